//! Membership reconfiguration: single-change discipline, and the leader's
//! rebalancer that promotes Reserve members through Passive to Active.

use raft_types::{Configuration, Member, MemberId, MemberType};

/// A leader-issued membership change. Per §4.4's single-change discipline,
/// no new `Configuration` entry may be logged while an earlier one remains
/// uncommitted.
#[derive(Debug, Clone)]
pub enum ReconfigCommand {
    /// Adds a new member, initially classified `Reserve`.
    Join {
        server_address: String,
        client_address: String,
    },
    /// Removes a member from the cluster.
    Leave { member_id: MemberId },
}

/// Applies a [`ReconfigCommand`] to a configuration, producing the next one.
/// `next_version` is the log index the resulting `Configuration` entry will
/// occupy.
pub fn apply_reconfig_command(
    current: &Configuration,
    command: &ReconfigCommand,
    next_member_id: MemberId,
    next_version: raft_types::LogIndex,
) -> Configuration {
    let mut members = current.members.clone();
    match command {
        ReconfigCommand::Join {
            server_address,
            client_address,
        } => {
            members.push(Member::new(
                next_member_id,
                MemberType::Reserve,
                server_address.clone(),
                client_address.clone(),
            ));
        }
        ReconfigCommand::Leave { member_id } => {
            members.retain(|m| m.id != *member_id);
        }
    }
    Configuration::new(next_version, members)
}

/// The leader-driven rebalancer: promotes `Reserve -> Passive -> Active` one
/// step per invocation, run after every heartbeat-induced availability
/// change and after every configuration commit (§4.4).
///
/// This is a pure function of `(configuration, availability)`: it never
/// blocks and never originates network calls — it only returns the intent
/// for the leader to log as the next `Configuration` entry.
pub fn rebalance(
    current: &Configuration,
    available: impl Fn(MemberId) -> bool,
) -> Option<Configuration> {
    let mut members = current.members.clone();
    let mut changed = false;

    // Promote one Reserve member to Passive, and one Passive member to
    // Active, per call — single-step promotion matches the single-change
    // discipline governing how often a new Configuration may be proposed.
    if let Some(reserve) = members
        .iter_mut()
        .find(|m| m.member_type == MemberType::Reserve && available(m.id))
    {
        reserve.member_type = MemberType::Passive;
        changed = true;
    } else if let Some(passive) = members
        .iter_mut()
        .find(|m| m.member_type == MemberType::Passive && available(m.id))
    {
        passive.member_type = MemberType::Active;
        changed = true;
    }

    if changed {
        Some(Configuration::new(current.version, members))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_types::LogIndex;

    fn config(members: Vec<Member>) -> Configuration {
        Configuration::new(LogIndex::new(1), members)
    }

    #[test]
    fn join_adds_member_as_reserve() {
        let current = config(vec![Member::new(
            MemberId::new(1),
            MemberType::Active,
            "a",
            "a",
        )]);
        let next = apply_reconfig_command(
            &current,
            &ReconfigCommand::Join {
                server_address: "b".into(),
                client_address: "b".into(),
            },
            MemberId::new(2),
            LogIndex::new(2),
        );
        assert_eq!(next.member(MemberId::new(2)).unwrap().member_type, MemberType::Reserve);
    }

    #[test]
    fn leave_removes_member() {
        let current = config(vec![
            Member::new(MemberId::new(1), MemberType::Active, "a", "a"),
            Member::new(MemberId::new(2), MemberType::Active, "b", "b"),
        ]);
        let next = apply_reconfig_command(
            &current,
            &ReconfigCommand::Leave {
                member_id: MemberId::new(2),
            },
            MemberId::new(0),
            LogIndex::new(2),
        );
        assert!(next.member(MemberId::new(2)).is_none());
    }

    #[test]
    fn rebalance_promotes_reserve_before_passive() {
        let current = config(vec![
            Member::new(MemberId::new(1), MemberType::Reserve, "a", "a"),
            Member::new(MemberId::new(2), MemberType::Passive, "b", "b"),
        ]);
        let next = rebalance(&current, |_| true).unwrap();
        assert_eq!(next.member(MemberId::new(1)).unwrap().member_type, MemberType::Passive);
        assert_eq!(next.member(MemberId::new(2)).unwrap().member_type, MemberType::Passive);
    }

    #[test]
    fn rebalance_is_noop_when_nothing_available() {
        let current = config(vec![Member::new(
            MemberId::new(1),
            MemberType::Reserve,
            "a",
            "a",
        )]);
        assert!(rebalance(&current, |_| false).is_none());
    }
}
