use crate::link::Link;
use crate::protocol::{ClientId, GroupId};
use hashbrown::HashSet;
use std::sync::Mutex;

/// Server-side per-client record: the id the server assigned it, its link,
/// and the set of groups it currently belongs to. Owned exclusively by the
/// server's worker table; group membership is a secondary index derived from
/// (and kept in sync with) the server's own group table.
pub struct Worker {
    id: ClientId,
    link: Link,
    groups: Mutex<HashSet<GroupId>>,
}

impl Worker {
    pub(crate) fn new(id: ClientId, link: Link) -> Worker {
        Worker { id, link, groups: Mutex::new(HashSet::new()) }
    }

    #[inline]
    pub fn id(&self) -> ClientId {
        self.id
    }

    #[inline]
    pub fn link(&self) -> &Link {
        &self.link
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.link.is_online()
    }

    pub(crate) fn add_group(&self, group: GroupId) {
        self.groups.lock().unwrap().insert(group);
    }

    pub(crate) fn remove_group(&self, group: GroupId) {
        self.groups.lock().unwrap().remove(&group);
    }

    /// Snapshot of the groups this worker currently belongs to.
    pub(crate) fn groups(&self) -> Vec<GroupId> {
        self.groups.lock().unwrap().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Listener;

    #[test]
    fn group_membership_round_trips() {
        let listener = Listener::open(0).unwrap();
        let port = listener.local_port().unwrap();
        let client = std::thread::spawn(move || Link::open("127.0.0.1", port).unwrap());
        let server_link = loop {
            if let Some(link) = listener.accept().unwrap() {
                break link;
            }
        };
        let _ = client.join().unwrap();

        let worker = Worker::new(3, server_link);
        worker.add_group(10);
        worker.add_group(11);
        assert_eq!(worker.groups().len(), 2);
        worker.remove_group(10);
        assert_eq!(worker.groups(), vec![11]);
    }
}
