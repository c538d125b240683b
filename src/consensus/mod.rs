pub mod gather;
pub mod peers;
pub mod rbc;

pub use gather::*;
pub use peers::*;
pub use rbc::*;

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::common::crypto::make_test_node_ids;
    use crate::common::NodeId;
    use crate::gpa::{AckHandler, AckHandlerConfig, AckInput, OwnHandler, TestContext};

    type Node = AckHandler<OwnHandler<Gather>>;

    fn committee(ids: &[NodeId]) -> BTreeMap<NodeId, Node> {
        let peers = Peers::new(ids.to_vec());
        ids.iter()
            .map(|id| {
                let gather = OwnHandler::new(*id, Gather::new(*id, peers.clone()));
                (*id, AckHandler::new(*id, gather, AckHandlerConfig::default()))
            })
            .collect()
    }

    fn inputs(ids: &[NodeId]) -> Vec<(NodeId, AckInput<Vec<u8>>)> {
        ids.iter()
            .map(|id| (*id, AckInput::Nested(id.0[..4].to_vec())))
            .collect()
    }

    fn ticks(ids: &[NodeId], now: Duration) -> Vec<(NodeId, AckInput<Vec<u8>>)> {
        ids.iter().map(|id| (*id, Node::make_tick_input(now))).collect()
    }

    #[test]
    fn test_gather_over_reliable_channel_without_loss() {
        let ids = make_test_node_ids(4);
        let mut tc = TestContext::new(committee(&ids))
            .with_inputs(inputs(&ids))
            .with_wire_codec(true);
        tc.run_all();

        assert_eq!(tc.number_of_outputs(), 4);
        // Everything sent got acknowledged on the way.
        for id in &ids {
            assert_eq!(tc.node(id).unacked_count(), 0, "{}", tc.status_strings().join("\n"));
        }
    }

    #[test]
    fn test_lossy_run_replays_byte_for_byte() {
        let ids = make_test_node_ids(4);
        let run = || {
            let mut tc = TestContext::new(committee(&ids))
                .with_inputs(inputs(&ids))
                .with_message_delivery_probability(0.7, 9)
                .with_wire_codec(true)
                .with_sent_log();
            tc.run_all();
            for secs in [1, 5, 9, 13] {
                tc.add_inputs(ticks(&ids, Duration::from_secs(secs)));
                tc.run_all();
            }
            assert!(tc.dropped_count() > 0);
            (tc.sent_log().to_vec(), tc.status_strings())
        };

        let (first_log, first_status) = run();
        let (second_log, second_status) = run();
        assert!(first_log.len() > ids.len());
        assert_eq!(first_log, second_log);
        assert_eq!(first_status, second_status);
    }

    #[test]
    fn test_gather_over_reliable_channel_with_loss() {
        let ids = make_test_node_ids(4);
        let mut tc = TestContext::new(committee(&ids))
            .with_inputs(inputs(&ids))
            .with_message_delivery_probability(0.6, 42)
            .with_wire_codec(true);

        let period = AckHandlerConfig::default().resend_period;
        let mut now = Duration::ZERO;
        let mut rounds = 0;
        loop {
            tc.run_all();
            let settled = tc.number_of_outputs() == ids.len()
                && ids.iter().all(|id| tc.node(id).unacked_count() == 0);
            if settled {
                break;
            }
            rounds += 1;
            assert!(rounds < 500, "no progress:\n{}", tc.status_strings().join("\n"));
            now += period;
            tc.add_inputs(ticks(&ids, now));
        }

        assert!(tc.dropped_count() > 0);
        let first = tc.output(&ids[0]).unwrap().clone();
        for id in &ids {
            let out = tc.output(id).unwrap();
            for (from, value) in out {
                assert_eq!(value, &from.0[..4].to_vec());
                if let Some(v) = first.get(from) {
                    assert_eq!(v, value);
                }
            }
        }
    }
}
