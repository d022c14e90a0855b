//! The network compiler
//!
//! Walks a [`Behavior`] against the bundle of wires it receives, emitting one
//! [`LinkSpec`] per runtime step. Along the way it:
//! - checks every primitive against the structural type it is applied to
//! - tracks the delay accumulated on every leaf
//! - delays the faster branch of each product or choice to match the slower
//! - turns partition crossings into sender/receiver link pairs
//! - pads latency-annotated behaviors to their declared maximum
//!
//! Problems are collected rather than returned early, so independent
//! branches each report their own errors.

use tracing::debug;

use crate::blueprint::{
    Blueprint, Bundle, ChannelId, ChannelSpec, LinkKind, LinkSpec, Port, Timing, WireSpec,
};
use crate::error::{CompileError, CompileErrors, Result, Site};
use tempora_core::{Behavior, LeafType, Latency, LinkId, PartitionId, Shape, Time, WireId};

/// Compile `behavior` for input signals shaped like `input`
///
/// # Example
///
/// ```
/// use tempora_compiler::compile;
/// use tempora_core::{Behavior, Shape};
///
/// let b = Behavior::dup()
///     .then(Behavior::second(Behavior::delay(10)))
///     .then(Behavior::zip());
/// let blueprint = compile(&b, &Shape::leaf("main", "int")).unwrap();
///
/// assert_eq!(blueprint.output().max_delay(), 10);
/// assert_eq!(blueprint.count("delay"), 2);
/// ```
pub fn compile(behavior: &Behavior, input: &Shape) -> Result<Blueprint> {
    let mut compiler = Compiler::default();
    let mut next_port = 0;
    let input = compiler.input_bundle(input, &mut next_port);
    let output = compiler.compile(behavior, input.clone(), &Site::root());

    match output {
        Some(output) if compiler.errors.is_empty() => {
            debug!(
                links = compiler.links.len(),
                wires = compiler.wires.len(),
                channels = compiler.channels.len(),
                "compiled behavior"
            );
            Ok(Blueprint {
                input,
                output,
                links: compiler.links,
                wires: compiler.wires,
                channels: compiler.channels,
            })
        }
        _ => {
            debug!(errors = compiler.errors.len(), "behavior failed to compile");
            Err(CompileErrors(compiler.errors))
        }
    }
}

#[derive(Default)]
struct Compiler {
    links: Vec<LinkSpec>,
    wires: Vec<WireSpec>,
    channels: Vec<ChannelSpec>,
    errors: Vec<CompileError>,
}

impl Compiler {
    // ========================================================================
    // Arena helpers
    // ========================================================================

    fn wire(&mut self, partition: &PartitionId, ty: &LeafType) -> WireId {
        let id = WireId(self.wires.len());
        self.wires.push(WireSpec {
            id,
            partition: partition.clone(),
            ty: ty.clone(),
        });
        id
    }

    fn link(
        &mut self,
        partition: &PartitionId,
        kind: LinkKind,
        inputs: Vec<WireId>,
        outputs: Vec<WireId>,
        site: &Site,
    ) -> LinkId {
        let id = LinkId(self.links.len());
        self.links.push(LinkSpec {
            id,
            partition: partition.clone(),
            kind,
            inputs,
            outputs,
            site: site.clone(),
        });
        id
    }

    /// A new port fed from `from` through a single-input link
    fn derive(
        &mut self,
        from: &Port,
        kind: LinkKind,
        ty: LeafType,
        timing: Timing,
        site: &Site,
    ) -> Port {
        let wire = self.wire(&from.partition, &ty);
        self.link(&from.partition, kind, vec![from.wire], vec![wire], site);
        Port {
            wire,
            partition: from.partition.clone(),
            ty,
            timing,
        }
    }

    fn input_bundle(&mut self, shape: &Shape, next_port: &mut usize) -> Bundle {
        match shape {
            Shape::Leaf { partition, ty } => {
                let port = *next_port;
                *next_port += 1;
                let wire = self.wire(partition, ty);
                let site = Site::root().child(format!("input[{}]", port));
                self.link(partition, LinkKind::Input { port }, vec![], vec![wire], &site);
                Bundle::Leaf(Port {
                    wire,
                    partition: partition.clone(),
                    ty: ty.clone(),
                    timing: Timing::default(),
                })
            }
            Shape::Product(l, r) => {
                let l = self.input_bundle(l, next_port);
                let r = self.input_bundle(r, next_port);
                Bundle::Product(Box::new(l), Box::new(r))
            }
            Shape::Sum(l, r) => {
                let l = self.input_bundle(l, next_port);
                let r = self.input_bundle(r, next_port);
                Bundle::Sum(Box::new(l), Box::new(r))
            }
        }
    }

    /// Fresh output wires for a shape, all with the same timing
    fn output_bundle(&mut self, shape: &Shape, timing: Timing) -> Bundle {
        match shape {
            Shape::Leaf { partition, ty } => Bundle::Leaf(Port {
                wire: self.wire(partition, ty),
                partition: partition.clone(),
                ty: ty.clone(),
                timing,
            }),
            Shape::Product(l, r) => Bundle::Product(
                Box::new(self.output_bundle(l, timing)),
                Box::new(self.output_bundle(r, timing)),
            ),
            Shape::Sum(l, r) => Bundle::Sum(
                Box::new(self.output_bundle(l, timing)),
                Box::new(self.output_bundle(r, timing)),
            ),
        }
    }

    fn map_ports<F>(&mut self, bundle: Bundle, f: &mut F) -> Bundle
    where
        F: FnMut(&mut Self, Port) -> Port,
    {
        match bundle {
            Bundle::Leaf(port) => Bundle::Leaf(f(self, port)),
            Bundle::Product(l, r) => {
                let l = self.map_ports(*l, f);
                let r = self.map_ports(*r, f);
                Bundle::Product(Box::new(l), Box::new(r))
            }
            Bundle::Sum(l, r) => {
                let l = self.map_ports(*l, f);
                let r = self.map_ports(*r, f);
                Bundle::Sum(Box::new(l), Box::new(r))
            }
        }
    }

    // ========================================================================
    // Timing
    // ========================================================================

    fn delay_port(&mut self, port: Port, delay: Time, site: &Site) -> Port {
        if delay == 0 {
            return port;
        }
        let ty = port.ty.clone();
        let timing = port.timing.delayed(delay);
        let site = site.child(format!("delay({})", delay));
        self.derive(&port, LinkKind::Delay(delay), ty, timing, &site)
    }

    /// Delay every leaf to the slowest one; the slower side always wins
    fn synchronize(&mut self, bundle: Bundle, site: &Site) -> Bundle {
        let target = bundle.max_delay();
        let site = site.child("synch");
        self.map_ports(bundle, &mut |c, port| {
            let lag = target - port.timing.max;
            c.delay_port(port, lag, &site)
        })
    }

    fn check_latency(&mut self, bounds: Latency, site: &Site) -> bool {
        if bounds.min < 0 || bounds.max < 0 {
            self.errors.push(CompileError::NegativeDelay {
                site: site.clone(),
                value: bounds.min.min(bounds.max),
            });
            return false;
        }
        if bounds.min > bounds.max {
            self.errors.push(CompileError::UnreconcilableDelay {
                site: site.clone(),
                detail: format!(
                    "minimum latency {} exceeds maximum {}",
                    bounds.min, bounds.max
                ),
            });
            return false;
        }
        true
    }

    // ========================================================================
    // Placement
    // ========================================================================

    fn cross_port(&mut self, port: Port, to: &PartitionId, site: &Site) -> Port {
        if &port.partition == to {
            return port;
        }
        let channel = ChannelId(self.channels.len());
        let sender = self.link(
            &port.partition,
            LinkKind::Send {
                channel,
                to: to.clone(),
            },
            vec![port.wire],
            vec![],
            site,
        );
        let wire = self.wire(to, &port.ty);
        let receiver = self.link(to, LinkKind::Receive { channel }, vec![], vec![wire], site);
        self.channels.push(ChannelSpec {
            id: channel,
            from: port.partition.clone(),
            to: to.clone(),
            sender,
            receiver,
        });
        Port {
            wire,
            partition: to.clone(),
            ty: port.ty,
            timing: port.timing,
        }
    }

    fn misplaced(&mut self, site: &Site, expected: &PartitionId, found: &PartitionId) {
        self.errors.push(CompileError::IllegalPlacement {
            site: site.clone(),
            expected: expected.clone(),
            found: found.clone(),
        });
    }

    fn mismatch(&mut self, site: &Site, expected: impl Into<String>, found: &Bundle) -> Option<Bundle> {
        self.errors.push(CompileError::TypeMismatch {
            site: site.clone(),
            expected: expected.into(),
            found: found.shape().to_string(),
        });
        None
    }

    /// Build a two-input link over a pair of leaves on the same partition
    fn join(&mut self, a: Port, b: Port, kind: LinkKind, ty: LeafType, site: &Site) -> Option<Port> {
        if a.partition != b.partition {
            self.misplaced(site, &a.partition, &b.partition);
            return None;
        }
        let target = a.timing.max.max(b.timing.max);
        let lag_a = target - a.timing.max;
        let lag_b = target - b.timing.max;
        let a = self.delay_port(a, lag_a, site);
        let b = self.delay_port(b, lag_b, site);
        let wire = self.wire(&a.partition, &ty);
        self.link(&a.partition, kind, vec![a.wire, b.wire], vec![wire], site);
        Some(Port {
            wire,
            partition: a.partition,
            ty,
            timing: Timing {
                min: a.timing.min.min(b.timing.min),
                max: target,
            },
        })
    }

    fn merge_bundles(&mut self, x: Bundle, y: Bundle, site: &Site) -> Option<Bundle> {
        match (x, y) {
            (Bundle::Leaf(a), Bundle::Leaf(b)) => {
                if a.ty != b.ty {
                    self.errors.push(CompileError::TypeMismatch {
                        site: site.clone(),
                        expected: a.ty.to_string(),
                        found: b.ty.to_string(),
                    });
                    return None;
                }
                let ty = a.ty.clone();
                self.join(a, b, LinkKind::Merge, ty, site).map(Bundle::Leaf)
            }
            (Bundle::Product(xl, xr), Bundle::Product(yl, yr)) => {
                let l = self.merge_bundles(*xl, *yl, site);
                let r = self.merge_bundles(*xr, *yr, site);
                Some(Bundle::Product(Box::new(l?), Box::new(r?)))
            }
            (Bundle::Sum(xl, xr), Bundle::Sum(yl, yr)) => {
                let l = self.merge_bundles(*xl, *yl, site);
                let r = self.merge_bundles(*xr, *yr, site);
                Some(Bundle::Sum(Box::new(l?), Box::new(r?)))
            }
            (x, y) => {
                let expected = x.shape().to_string();
                self.mismatch(site, expected, &y)
            }
        }
    }

    // ========================================================================
    // Behaviors
    // ========================================================================

    fn compile(&mut self, behavior: &Behavior, input: Bundle, site: &Site) -> Option<Bundle> {
        match behavior {
            Behavior::Identity => Some(input),

            Behavior::Then(first, next) => {
                let mid = self.compile(first, input, &site.child("then[0]"))?;
                self.compile(next, mid, &site.child("then[1]"))
            }

            Behavior::Product(left, right) => match input {
                Bundle::Product(x, y) => {
                    let x = self.compile(left, *x, &site.child("product.left"));
                    let y = self.compile(right, *y, &site.child("product.right"));
                    let joined = Bundle::Product(Box::new(x?), Box::new(y?));
                    Some(self.synchronize(joined, &site.child("product")))
                }
                other => self.mismatch(&site.child("product"), "a product", &other),
            },

            Behavior::Choice(left, right) => match input {
                Bundle::Sum(x, y) => {
                    let x = self.compile(left, *x, &site.child("choice.left"));
                    let y = self.compile(right, *y, &site.child("choice.right"));
                    let joined = Bundle::Sum(Box::new(x?), Box::new(y?));
                    Some(self.synchronize(joined, &site.child("choice")))
                }
                other => self.mismatch(&site.child("choice"), "a sum", &other),
            },

            Behavior::Dup => Some(Bundle::Product(Box::new(input.clone()), Box::new(input))),

            Behavior::Fst => match input {
                Bundle::Product(x, _) => Some(*x),
                other => self.mismatch(&site.child("fst"), "a product", &other),
            },

            Behavior::Snd => match input {
                Bundle::Product(_, y) => Some(*y),
                other => self.mismatch(&site.child("snd"), "a product", &other),
            },

            Behavior::Swap => match input {
                Bundle::Product(x, y) => Some(Bundle::Product(y, x)),
                other => self.mismatch(&site.child("swap"), "a product", &other),
            },

            Behavior::Mirror => match input {
                Bundle::Sum(x, y) => Some(Bundle::Sum(y, x)),
                other => self.mismatch(&site.child("mirror"), "a sum", &other),
            },

            Behavior::Map { name, output, f } => {
                let here = site.child(format!("map({})", name));
                match input {
                    Bundle::Leaf(port) => {
                        let kind = LinkKind::Map {
                            name: name.clone(),
                            f: f.clone(),
                        };
                        let timing = port.timing;
                        let out = self.derive(&port, kind, output.clone(), timing, &here);
                        Some(Bundle::Leaf(out))
                    }
                    other => self.mismatch(&here, "a leaf", &other),
                }
            }

            Behavior::Zip => {
                let here = site.child("zip");
                match input {
                    Bundle::Product(x, y) => match (*x, *y) {
                        (Bundle::Leaf(a), Bundle::Leaf(b)) => {
                            let ty = LeafType::pair(a.ty.clone(), b.ty.clone());
                            self.join(a, b, LinkKind::Zip, ty, &here).map(Bundle::Leaf)
                        }
                        (x, y) => {
                            let found = Bundle::Product(Box::new(x), Box::new(y));
                            self.mismatch(&here, "a product of two leaves", &found)
                        }
                    },
                    other => self.mismatch(&here, "a product of two leaves", &other),
                }
            }

            Behavior::Unzip => {
                let here = site.child("unzip");
                match input {
                    Bundle::Leaf(port) => {
                        let Some((l, r)) = port.ty.as_pair().map(|(l, r)| (l.clone(), r.clone()))
                        else {
                            return self.mismatch(&here, "a leaf of pairs", &Bundle::Leaf(port));
                        };
                        let lw = self.wire(&port.partition, &l);
                        let rw = self.wire(&port.partition, &r);
                        self.link(&port.partition, LinkKind::Unzip, vec![port.wire], vec![lw, rw], &here);
                        let left = Port {
                            wire: lw,
                            partition: port.partition.clone(),
                            ty: l,
                            timing: port.timing,
                        };
                        let right = Port {
                            wire: rw,
                            partition: port.partition,
                            ty: r,
                            timing: port.timing,
                        };
                        Some(Bundle::Product(
                            Box::new(Bundle::Leaf(left)),
                            Box::new(Bundle::Leaf(right)),
                        ))
                    }
                    other => self.mismatch(&here, "a leaf of pairs", &other),
                }
            }

            Behavior::Split { name, predicate } => {
                let here = site.child(format!("split({})", name));
                match input {
                    Bundle::Leaf(port) => {
                        let lw = self.wire(&port.partition, &port.ty);
                        let rw = self.wire(&port.partition, &port.ty);
                        let kind = LinkKind::Split {
                            name: name.clone(),
                            predicate: predicate.clone(),
                        };
                        self.link(&port.partition, kind, vec![port.wire], vec![lw, rw], &here);
                        let left = Port {
                            wire: lw,
                            ..port.clone()
                        };
                        let right = Port { wire: rw, ..port };
                        Some(Bundle::Sum(
                            Box::new(Bundle::Leaf(left)),
                            Box::new(Bundle::Leaf(right)),
                        ))
                    }
                    other => self.mismatch(&here, "a leaf", &other),
                }
            }

            Behavior::Merge => {
                let here = site.child("merge");
                match input {
                    Bundle::Sum(x, y) => self.merge_bundles(*x, *y, &here),
                    other => self.mismatch(&here, "a sum", &other),
                }
            }

            Behavior::Delay(delay) => {
                let here = site.child(format!("delay({})", delay));
                if *delay < 0 {
                    self.errors.push(CompileError::NegativeDelay {
                        site: here,
                        value: *delay,
                    });
                    return None;
                }
                let delay = *delay as Time;
                Some(self.map_ports(input, &mut |c, port| c.delay_port(port, delay, site)))
            }

            Behavior::Latency { inner, bounds } => {
                let here = site.child(format!("latency{}", bounds));
                if !self.check_latency(*bounds, &here) {
                    return None;
                }
                let start_max = input.max_delay();
                let start_min = input.min_delay();
                let out = self.compile(inner, input, &here)?;

                let target = start_max.saturating_add(bounds.max as Time);
                let slowest = out.max_delay();
                if slowest > target {
                    self.errors.push(CompileError::UnreconcilableDelay {
                        site: here,
                        detail: format!(
                            "inner behavior takes {} but declares at most {}",
                            slowest - start_max,
                            bounds.max
                        ),
                    });
                    return None;
                }
                let floor = start_min.saturating_add(bounds.min as Time).min(target);
                Some(self.map_ports(out, &mut |c, port| {
                    let lag = target - port.timing.max;
                    let mut port = c.delay_port(port, lag, &here.child("pad"));
                    port.timing.min = port.timing.min.max(floor);
                    port
                }))
            }

            Behavior::Synch => Some(self.synchronize(input, site)),

            Behavior::Cross(to) => {
                let here = site.child(format!("cross({})", to));
                Some(self.map_ports(input, &mut |c, port| c.cross_port(port, to, &here)))
            }

            Behavior::At(partition) => {
                let here = site.child(format!("at({})", partition));
                let misplaced: Vec<PartitionId> = input
                    .ports()
                    .into_iter()
                    .filter(|p| &p.partition != partition)
                    .map(|p| p.partition.clone())
                    .collect();
                if misplaced.is_empty() {
                    return Some(input);
                }
                for found in &misplaced {
                    self.misplaced(&here, partition, found);
                }
                None
            }

            Behavior::Expect(shape) => {
                if &input.shape() == shape {
                    return Some(input);
                }
                let expected = shape.to_string();
                self.mismatch(&site.child("expect"), expected, &input)
            }

            Behavior::Dynamic {
                library,
                output,
                latency,
            } => {
                let here = site.child("dynamic");
                if !self.check_latency(*latency, &here) {
                    return None;
                }
                let (name, x) = match input {
                    Bundle::Product(n, x) => match *n {
                        Bundle::Leaf(port) => (port, *x),
                        other => {
                            let found = Bundle::Product(Box::new(other), x);
                            return self.mismatch(&here, "a product of a name leaf and an input", &found);
                        }
                    },
                    other => {
                        return self.mismatch(&here, "a product of a name leaf and an input", &other)
                    }
                };

                // installed sub-networks run on the naming leaf's partition
                let home = name.partition.clone();
                let mut placed = true;
                for found in x
                    .ports()
                    .into_iter()
                    .map(|p| &p.partition)
                    .chain(output.leaves().into_iter().map(|(p, _)| p))
                    .filter(|p| **p != home)
                    .cloned()
                    .collect::<Vec<_>>()
                {
                    self.misplaced(&here, &home, &found);
                    placed = false;
                }
                if !placed {
                    return None;
                }

                let target = name.timing.max.max(x.max_delay());
                let start_min = name.timing.min.min(x.min_delay());
                let lag = target - name.timing.max;
                let name = self.delay_port(name, lag, &here);
                let x = self.map_ports(x, &mut |c, port| {
                    let lag = target - port.timing.max;
                    c.delay_port(port, lag, &here)
                });

                let timing = Timing {
                    min: start_min.saturating_add(latency.min as Time),
                    max: target.saturating_add(latency.max as Time),
                };
                let out = self.output_bundle(output, timing);
                let mut inputs = vec![name.wire];
                inputs.extend(x.wires());
                let kind = LinkKind::Dynamic {
                    library: library.clone(),
                    input: x.shape(),
                    output: output.clone(),
                    latency: *latency,
                };
                self.link(&home, kind, inputs, out.wires(), &here);
                Some(out)
            }

            Behavior::Observe { name, observer } => {
                let here = site.child(format!("observe({})", name));
                match input {
                    Bundle::Leaf(port) => {
                        let kind = LinkKind::Observe {
                            name: name.clone(),
                            observer: observer.clone(),
                        };
                        self.link(&port.partition, kind, vec![port.wire], vec![], &here);
                        Some(Bundle::Leaf(port))
                    }
                    other => self.mismatch(&here, "a leaf", &other),
                }
            }
        }
    }
}
