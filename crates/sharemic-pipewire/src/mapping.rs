//! Channel mapping between a routed node and the virtual sink.

use tracing::debug;

use crate::link::CreatedLink;
use crate::node::PortInfo;

/// Channel label PipeWire uses for ports with an unknown position.
pub const UNKNOWN_CHANNEL: &str = "UNK";

/// One connection to make: routed node output -> virtual sink input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPair {
    /// Virtual sink input port ID
    pub sink_port: u32,
    /// Routed node output port ID
    pub target_port: u32,
    /// Channel of the routed port, for logging
    pub channel: String,
}

impl PortPair {
    /// Check if an existing link already connects this pair.
    #[must_use]
    pub fn is_linked_by(&self, link: &CreatedLink) -> bool {
        link.sink_port == self.sink_port && link.target_port == self.target_port
    }
}

fn channels_match(sink_port: &PortInfo, target_port: &PortInfo) -> bool {
    if sink_port.channel() == UNKNOWN_CHANNEL || target_port.channel() == UNKNOWN_CHANNEL {
        return sink_port.index() == target_port.index();
    }

    sink_port.channel() == target_port.channel()
}

/// Decide which target outputs feed which sink inputs.
///
/// A single output port is mono and feeds every sink input. Otherwise ports
/// pair up by `audio.channel`; when either side reports `UNK` the ports pair
/// up by their index within the node (`port.id`) instead.
#[must_use]
pub fn map_ports(target_outputs: &[&PortInfo], sink_inputs: &[&PortInfo]) -> Vec<PortPair> {
    let is_mono = target_outputs.len() == 1;
    let mut pairs = Vec::new();

    for target in target_outputs {
        let before = pairs.len();

        pairs.extend(
            sink_inputs
                .iter()
                .filter(|sink| is_mono || channels_match(sink, target))
                .map(|sink| PortPair {
                    sink_port: sink.id,
                    target_port: target.id,
                    channel: target.channel().to_string(),
                }),
        );

        debug!(port = target.id, mapped = pairs.len() - before, mono = is_mono, "Mapped port");
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PortDirection;

    fn port(id: u32, direction: PortDirection, index: u32, channel: &str) -> PortInfo {
        PortInfo {
            id,
            direction,
            properties: [
                ("audio.channel".to_string(), channel.to_string()),
                ("port.id".to_string(), index.to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn sink_inputs() -> Vec<PortInfo> {
        vec![port(100, PortDirection::Input, 0, "FL"), port(101, PortDirection::Input, 1, "FR")]
    }

    #[test]
    fn test_stereo_maps_one_to_one() {
        let sink = sink_inputs();
        let target = [port(20, PortDirection::Output, 0, "FL"), port(21, PortDirection::Output, 1, "FR")];

        let pairs = map_ports(&target.iter().collect::<Vec<_>>(), &sink.iter().collect::<Vec<_>>());

        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().any(|p| p.target_port == 20 && p.sink_port == 100));
        assert!(pairs.iter().any(|p| p.target_port == 21 && p.sink_port == 101));
    }

    #[test]
    fn test_mono_fans_out_to_every_input() {
        let sink = sink_inputs();
        let target = [port(20, PortDirection::Output, 0, "MONO")];

        let pairs = map_ports(&target.iter().collect::<Vec<_>>(), &sink.iter().collect::<Vec<_>>());

        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.target_port == 20));
    }

    #[test]
    fn test_unknown_channel_on_both_sides_falls_back_to_index() {
        let sink = [port(100, PortDirection::Input, 0, "UNK")];
        let target = [port(20, PortDirection::Output, 0, "UNK")];

        let pairs = map_ports(&target.iter().collect::<Vec<_>>(), &sink.iter().collect::<Vec<_>>());

        assert_eq!(pairs, vec![PortPair { sink_port: 100, target_port: 20, channel: "UNK".into() }]);
    }

    #[test]
    fn test_unknown_channel_pairs_by_index() {
        let sink = [port(100, PortDirection::Input, 0, "FL"), port(101, PortDirection::Input, 1, "FR")];
        let target = [port(20, PortDirection::Output, 0, "UNK"), port(21, PortDirection::Output, 1, "UNK")];

        let pairs = map_ports(&target.iter().collect::<Vec<_>>(), &sink.iter().collect::<Vec<_>>());

        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().any(|p| p.target_port == 20 && p.sink_port == 100));
        assert!(pairs.iter().any(|p| p.target_port == 21 && p.sink_port == 101));
    }

    #[test]
    fn test_unmatched_channels_produce_nothing() {
        let sink = sink_inputs();
        let target = [port(20, PortDirection::Output, 0, "RL"), port(21, PortDirection::Output, 1, "RR")];

        let pairs = map_ports(&target.iter().collect::<Vec<_>>(), &sink.iter().collect::<Vec<_>>());

        assert!(pairs.is_empty());
    }

    #[test]
    fn test_surround_only_front_channels_map() {
        let sink = sink_inputs();
        let target = [
            port(20, PortDirection::Output, 0, "FL"),
            port(21, PortDirection::Output, 1, "FR"),
            port(22, PortDirection::Output, 2, "FC"),
            port(23, PortDirection::Output, 3, "LFE"),
        ];

        let pairs = map_ports(&target.iter().collect::<Vec<_>>(), &sink.iter().collect::<Vec<_>>());

        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_no_outputs() {
        let sink = sink_inputs();

        assert!(map_ports(&[], &sink.iter().collect::<Vec<_>>()).is_empty());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn channel() -> impl Strategy<Value = &'static str> {
            prop_oneof![Just("FL"), Just("FR"), Just("FC"), Just("MONO"), Just("UNK")]
        }

        proptest! {
            #[test]
            fn every_pair_references_known_ports(channels in proptest::collection::vec(channel(), 0..6)) {
                let sink = sink_inputs();
                let target: Vec<PortInfo> = channels
                    .iter()
                    .enumerate()
                    .map(|(i, ch)| port(20 + i as u32, PortDirection::Output, i as u32, ch))
                    .collect();

                let pairs = map_ports(&target.iter().collect::<Vec<_>>(), &sink.iter().collect::<Vec<_>>());

                prop_assert!(pairs.len() <= target.len() * sink.len());
                for pair in &pairs {
                    prop_assert!(sink.iter().any(|p| p.id == pair.sink_port));
                    prop_assert!(target.iter().any(|p| p.id == pair.target_port));
                }
                if target.len() == 1 {
                    prop_assert_eq!(pairs.len(), sink.len());
                }
            }
        }
    }
}
