//! Compiled network blueprints
//!
//! A [`Blueprint`] is the validated output of the compiler: every link the
//! network needs, which partition owns it, the leaf wires between links and
//! the cross-partition channels. It holds no runtime state, so one blueprint
//! can be instantiated into any number of independent networks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Site;
use tempora_core::{
    BehaviorLibrary, LeafType, Latency, LinkId, MapFn, Observer, PartitionId, Predicate, Shape,
    Time, WireId,
};

/// Identifier of a cross-partition channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub usize);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel:{}", self.0)
    }
}

/// Accumulated latency of a leaf relative to the network input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Timing {
    /// Earliest effect of the input on this leaf
    pub min: Time,
    /// Delay actually applied to this leaf
    pub max: Time,
}

impl Timing {
    /// Timing of an exact delay
    pub fn exact(delay: Time) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    /// The same timing pushed back by `delay`
    pub fn delayed(self, delay: Time) -> Self {
        Self {
            min: self.min.saturating_add(delay),
            max: self.max.saturating_add(delay),
        }
    }
}

/// One leaf wire of a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub wire: WireId,
    pub partition: PartitionId,
    pub ty: LeafType,
    pub timing: Timing,
}

/// A shape whose leaves are bound to wires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bundle {
    Leaf(Port),
    Product(Box<Bundle>, Box<Bundle>),
    Sum(Box<Bundle>, Box<Bundle>),
}

impl Bundle {
    /// Structural type of the bundle
    pub fn shape(&self) -> Shape {
        match self {
            Bundle::Leaf(port) => Shape::leaf(port.partition.clone(), port.ty.clone()),
            Bundle::Product(l, r) => Shape::product(l.shape(), r.shape()),
            Bundle::Sum(l, r) => Shape::sum(l.shape(), r.shape()),
        }
    }

    /// Leaf ports, left to right
    pub fn ports(&self) -> Vec<&Port> {
        match self {
            Bundle::Leaf(port) => vec![port],
            Bundle::Product(l, r) | Bundle::Sum(l, r) => {
                let mut out = l.ports();
                out.extend(r.ports());
                out
            }
        }
    }

    /// Leaf wires, left to right
    pub fn wires(&self) -> Vec<WireId> {
        self.ports().into_iter().map(|p| p.wire).collect()
    }

    /// Largest applied delay among the leaves
    pub fn max_delay(&self) -> Time {
        self.ports().iter().map(|p| p.timing.max).max().unwrap_or(0)
    }

    /// Smallest declared earliest effect among the leaves
    pub fn min_delay(&self) -> Time {
        self.ports().iter().map(|p| p.timing.min).min().unwrap_or(0)
    }
}

/// Runtime behavior of a compiled link
#[derive(Clone)]
pub enum LinkKind {
    /// External input port `port`
    Input { port: usize },
    /// Receiving end of a cross-partition channel
    Receive { channel: ChannelId },
    /// Sending end of a cross-partition channel
    Send { channel: ChannelId, to: PartitionId },
    Map { name: String, f: MapFn },
    Zip,
    Unzip,
    Split { name: String, predicate: Predicate },
    Merge,
    Delay(Time),
    Observe {
        name: String,
        observer: Arc<dyn Observer>,
    },
    /// Installs behaviors named by its first input at runtime
    Dynamic {
        library: Arc<dyn BehaviorLibrary>,
        input: Shape,
        output: Shape,
        latency: Latency,
    },
}

impl LinkKind {
    /// Short name of the link kind
    pub fn name(&self) -> &'static str {
        match self {
            LinkKind::Input { .. } => "input",
            LinkKind::Receive { .. } => "receive",
            LinkKind::Send { .. } => "send",
            LinkKind::Map { .. } => "map",
            LinkKind::Zip => "zip",
            LinkKind::Unzip => "unzip",
            LinkKind::Split { .. } => "split",
            LinkKind::Merge => "merge",
            LinkKind::Delay(_) => "delay",
            LinkKind::Observe { .. } => "observe",
            LinkKind::Dynamic { .. } => "dynamic",
        }
    }

    /// Check if the link takes its input from outside the partition
    pub fn is_ingress(&self) -> bool {
        matches!(self, LinkKind::Input { .. } | LinkKind::Receive { .. })
    }
}

impl fmt::Debug for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Input { port } => write!(f, "Input({})", port),
            LinkKind::Receive { channel } => write!(f, "Receive({})", channel),
            LinkKind::Send { channel, to } => write!(f, "Send({} -> {})", channel, to),
            LinkKind::Map { name, .. } => write!(f, "Map({})", name),
            LinkKind::Split { name, .. } => write!(f, "Split({})", name),
            LinkKind::Delay(d) => write!(f, "Delay({})", d),
            LinkKind::Observe { name, .. } => write!(f, "Observe({})", name),
            LinkKind::Dynamic {
                input,
                output,
                latency,
                ..
            } => write!(f, "Dynamic({} -> {} within {})", input, output, latency),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// A compiled link
#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub id: LinkId,
    pub partition: PartitionId,
    pub kind: LinkKind,
    /// Wires read by the link, in the order its kind expects
    pub inputs: Vec<WireId>,
    /// Wires produced by the link
    pub outputs: Vec<WireId>,
    /// Where in the behavior description the link came from
    pub site: Site,
}

/// A leaf wire; produced by exactly one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSpec {
    pub id: WireId,
    pub partition: PartitionId,
    pub ty: LeafType,
}

/// A cross-partition hand-off between a sender and a receiver link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub id: ChannelId,
    pub from: PartitionId,
    pub to: PartitionId,
    pub sender: LinkId,
    pub receiver: LinkId,
}

/// Validated, partitioned link network
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub(crate) input: Bundle,
    pub(crate) output: Bundle,
    pub(crate) links: Vec<LinkSpec>,
    pub(crate) wires: Vec<WireSpec>,
    pub(crate) channels: Vec<ChannelSpec>,
}

impl Blueprint {
    /// Input bundle; its leaves are the input ports, left to right
    pub fn input(&self) -> &Bundle {
        &self.input
    }

    /// Output bundle; its leaves are the output ports, left to right
    pub fn output(&self) -> &Bundle {
        &self.output
    }

    /// All links in topological order
    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    /// Links owned by `partition`, in topological order
    pub fn links_on<'a>(&'a self, partition: &'a PartitionId) -> impl Iterator<Item = &'a LinkSpec> {
        self.links.iter().filter(move |l| &l.partition == partition)
    }

    /// All wires
    pub fn wires(&self) -> &[WireSpec] {
        &self.wires
    }

    /// Look up a wire
    pub fn wire(&self, id: WireId) -> Option<&WireSpec> {
        self.wires.get(id.0)
    }

    /// Cross-partition channels
    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    /// Partitions owning at least one link, in first-seen order
    pub fn partitions(&self) -> Vec<&PartitionId> {
        let mut out: Vec<&PartitionId> = Vec::new();
        for link in &self.links {
            if !out.contains(&&link.partition) {
                out.push(&link.partition);
            }
        }
        out
    }

    /// Partitions that send to `partition` through some channel
    pub fn upstream_of(&self, partition: &PartitionId) -> Vec<&PartitionId> {
        let mut out: Vec<&PartitionId> = Vec::new();
        for channel in self.channels.iter().filter(|c| &c.to == partition) {
            if !out.contains(&&channel.from) {
                out.push(&channel.from);
            }
        }
        out
    }

    /// Number of links of a given kind name
    pub fn count(&self, kind: &str) -> usize {
        self.links.iter().filter(|l| l.kind.name() == kind).count()
    }
}
