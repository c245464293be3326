use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use conductor_proto::Address;
use errors::*;

/// Cluster membership notifications delivered to every member.
#[derive(Clone, Debug, PartialEq)]
pub enum MembershipEvent {
    /// A peer joined the computation. Every member also receives a joined
    /// event for itself and, on joining, replayed events for the peers that
    /// were already present.
    Joined(Address),
    /// A peer left gracefully.
    Left(Address),
    /// A peer was detected as failed.
    Died(Address),
    /// A leader election concluded.
    LeaderElected(Address),
}

pub trait MembershipListener: Send + Sync {
    fn on_membership_event(&self, event: MembershipEvent);
}

/// The cluster-membership contract: join/leave/failure notifications plus a
/// one-shot leader election. One handle per node.
pub trait Membership: Send + Sync {
    /// Joins the cluster and registers the listener for future events.
    /// Events for members that joined earlier are replayed to the listener
    /// before this returns.
    fn join(&self, listener: Arc<MembershipListener>) -> Result<()>;

    /// One-shot election: every caller receives the same winner for the
    /// lifetime of the cluster.
    fn elect_leader(&self) -> Result<Address>;

    fn members(&self) -> Vec<Address>;

    /// Graceful departure; peers observe `Left`.
    fn leave(&self) -> Result<()>;

    /// Report a peer believed dead; peers observe `Died`.
    fn declare_dead(&self, peer: &Address);
}

#[derive(Default)]
struct ClusterState {
    members: Vec<Address>,
    listeners: HashMap<Address, Arc<MembershipListener>>,
    leader: Option<Address>,
}

/// In-process membership for tests and the single-process demo cluster: a
/// shared registry that synchronously fans events out to every member's
/// listener.
pub struct LocalCluster {
    state: Mutex<ClusterState>,
}

impl LocalCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(LocalCluster {
            state: Mutex::new(Default::default()),
        })
    }

    /// Creates the membership handle a node at `address` will use.
    pub fn handle(cluster: &Arc<Self>, address: &str) -> LocalMembership {
        LocalMembership {
            cluster: Arc::clone(cluster),
            address: address.to_owned(),
        }
    }

    fn broadcast(&self, event: MembershipEvent) {
        let listeners: Vec<Arc<MembershipListener>> = {
            let state = self.state.lock().unwrap();
            state.listeners.values().cloned().collect()
        };
        for listener in listeners {
            listener.on_membership_event(event.clone());
        }
    }

    fn remove_member(&self, address: &Address) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.members.len();
        state.members.retain(|member| member != address);
        state.listeners.remove(address);
        state.members.len() != before
    }
}

pub struct LocalMembership {
    cluster: Arc<LocalCluster>,
    address: Address,
}

impl Membership for LocalMembership {
    fn join(&self, listener: Arc<MembershipListener>) -> Result<()> {
        let (replay, leader) = {
            let mut state = self.cluster.state.lock().unwrap();
            if state.members.contains(&self.address) {
                bail!(format!("{} is already a cluster member", self.address));
            }
            let replay = state.members.clone();
            state.members.push(self.address.clone());
            state.listeners.insert(self.address.clone(), Arc::clone(&listener));
            (replay, state.leader.clone())
        };

        // The newcomer first learns about the existing members and any
        // completed election, then everyone (newcomer included) hears about
        // the join itself.
        for member in replay {
            listener.on_membership_event(MembershipEvent::Joined(member));
        }
        if let Some(leader) = leader {
            listener.on_membership_event(MembershipEvent::LeaderElected(leader));
        }
        self.cluster.broadcast(MembershipEvent::Joined(self.address.clone()));
        Ok(())
    }

    fn elect_leader(&self) -> Result<Address> {
        let (winner, newly_elected) = {
            let mut state = self.cluster.state.lock().unwrap();
            if !state.members.contains(&self.address) {
                bail!("Only cluster members can run for election");
            }
            match state.leader.clone() {
                Some(winner) => (winner, false),
                None => {
                    state.leader = Some(self.address.clone());
                    (self.address.clone(), true)
                }
            }
        };

        if newly_elected {
            self.cluster
                .broadcast(MembershipEvent::LeaderElected(winner.clone()));
        }
        Ok(winner)
    }

    fn members(&self) -> Vec<Address> {
        self.cluster.state.lock().unwrap().members.clone()
    }

    fn leave(&self) -> Result<()> {
        if self.cluster.remove_member(&self.address) {
            self.cluster
                .broadcast(MembershipEvent::Left(self.address.clone()));
        }
        Ok(())
    }

    fn declare_dead(&self, peer: &Address) {
        if self.cluster.remove_member(peer) {
            self.cluster.broadcast(MembershipEvent::Died(peer.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct EventLog {
        events: Mutex<Vec<MembershipEvent>>,
    }

    impl MembershipListener for EventLog {
        fn on_membership_event(&self, event: MembershipEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_join_replays_existing_members() {
        let cluster = LocalCluster::new();
        let first = LocalCluster::handle(&cluster, "n1");
        let second = LocalCluster::handle(&cluster, "n2");

        first.join(Arc::new(EventLog::default())).unwrap();

        let log = Arc::new(EventLog::default());
        second.join(Arc::clone(&log) as Arc<MembershipListener>).unwrap();

        let events = log.events.lock().unwrap();
        assert_eq!(events[0], MembershipEvent::Joined("n1".to_owned()));
        assert_eq!(events[1], MembershipEvent::Joined("n2".to_owned()));
    }

    #[test]
    fn test_election_is_one_shot() {
        let cluster = LocalCluster::new();
        let first = LocalCluster::handle(&cluster, "n1");
        let second = LocalCluster::handle(&cluster, "n2");
        first.join(Arc::new(EventLog::default())).unwrap();
        second.join(Arc::new(EventLog::default())).unwrap();

        assert_eq!(first.elect_leader().unwrap(), "n1");
        assert_eq!(second.elect_leader().unwrap(), "n1");
    }

    #[test]
    fn test_leave_notifies_remaining_members() {
        let cluster = LocalCluster::new();
        let first = LocalCluster::handle(&cluster, "n1");
        let second = LocalCluster::handle(&cluster, "n2");

        let log = Arc::new(EventLog::default());
        first.join(Arc::clone(&log) as Arc<MembershipListener>).unwrap();
        second.join(Arc::new(EventLog::default())).unwrap();
        second.leave().unwrap();

        let events = log.events.lock().unwrap();
        assert!(events.contains(&MembershipEvent::Left("n2".to_owned())));
        assert_eq!(first.members(), vec!["n1".to_owned()]);
    }
}
