//! The component tree (SPEC_FULL.md §3, §4.2-§4.4): a VCU fleet rooted at
//! one synthetic root node, each VCU owning a fixed set of subcomponent
//! leaves. Dispatch walks dotted target paths recursively so that every
//! ancestor on the path runs its `pre_transition` strictly before the
//! terminal component executes the command (SPEC_FULL.md §5's "ancestor
//! callstack happens-before terminal invocation" invariant) -- call-stack
//! ordering gives us this for free instead of materializing a `Vec` of
//! ancestor references, which the borrow checker would refuse for a single
//! owned tree.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::command::{Command, Operation};
use crate::config::{Config, SubcomponentConfig, VcuConfig};
use crate::driver::{CommandFault, Driver, PowerSupplyDriver, RemoteShellDriver};
use crate::pinger;
use crate::telemetry::{TelemetryKeeper, TelemetryPoint, TelemetryValue};
use crate::vcu::{VcuRuntime, VcuState};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Root,
    Vcu,
    PowerSupply,
    SerialLine,
    RemoteShell,
    Vlan,
    Generic,
}

/// One node in the tree. Leaves carry a driver; VCU nodes carry the state
/// machine; the root carries neither.
pub struct Component {
    pub name: String,
    pub kind: ComponentKind,
    pub children: Vec<(String, Component)>,
    pub keeper: TelemetryKeeper,
    pub driver: Option<Box<dyn Driver>>,
    pub vcu: Option<VcuRuntime>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl Component {
    fn leaf(name: impl Into<String>, kind: ComponentKind, driver: Option<Box<dyn Driver>>) -> Self {
        let name = name.into();
        Self {
            keeper: TelemetryKeeper::new(name.clone()),
            name,
            kind,
            children: Vec::new(),
            driver,
            vcu: None,
        }
    }

    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.children.iter_mut().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Recursively dispatch a command along its dotted target path. Every
    /// node visited -- ancestor or terminal -- gets a `pre_transition` call
    /// before the walk continues.
    pub fn dispatch<'a>(&'a mut self, path: &'a [&'a str], cmd: &'a Command) -> BoxFuture<'a, Result<(), CommandFault>> {
        Box::pin(async move {
            self.pre_transition(cmd);
            match path.split_first() {
                None => self.execute_terminal(cmd).await,
                Some((head, rest)) => {
                    let child = self
                        .find_child_mut(head)
                        .ok_or_else(|| CommandFault::Warning(format!("no such component '{head}'")))?;
                    child.dispatch(rest, cmd).await
                }
            }
        })
    }

    /// Applied to every node on a command's path before execution
    /// continues. A VCU sitting idle and about to have one of its
    /// descendants (or itself) acted on moves to `command`; terminal
    /// VCU-targeted operations immediately overwrite this with their own
    /// target state in [`Component::execute_vcu_command`].
    fn pre_transition(&mut self, _cmd: &Command) {
        if let Some(vcu) = self.vcu.as_mut() {
            if vcu.state == VcuState::Idle {
                vcu.state = VcuState::Command;
            }
        }
    }

    fn execute_terminal<'a>(&'a mut self, cmd: &'a Command) -> BoxFuture<'a, Result<(), CommandFault>> {
        Box::pin(async move {
            if self.kind == ComponentKind::Vcu {
                return self.execute_vcu_command(cmd).await;
            }
            let verb = cmd
                .options
                .get("command")
                .and_then(Value::as_str)
                .ok_or_else(|| CommandFault::Warning("command options missing 'command' verb".into()))?
                .to_string();
            let arg = cmd.options.get("value").cloned().unwrap_or_else(|| cmd.options.clone());
            let driver = self
                .driver
                .as_mut()
                .ok_or_else(|| CommandFault::Warning(format!("component '{}' has no driver", self.name)))?;
            driver.invoke(&verb, &arg).await
        })
    }

    /// VCU-targeted operations (SPEC_FULL.md §4.2): these act on the VCU's
    /// own state machine and, for `enable`/`power_off`/`bring_offline`, the
    /// pingers attached to its remote-shell children. `enable` additionally
    /// powers on both PSU channels (SPEC_FULL.md §6) before booting starts.
    async fn execute_vcu_command(&mut self, cmd: &Command) -> Result<(), CommandFault> {
        match cmd.operation {
            Operation::Enable => {
                self.spawn_pingers();
                self.enable_psu_outputs().await;
                self.vcu_mut()?.state = VcuState::Booting;
                Ok(())
            }
            Operation::PowerOff => {
                self.stop_pingers().await;
                self.close_children().await;
                self.rebuild_children();
                self.vcu_mut()?.state = VcuState::PowerOff;
                Ok(())
            }
            Operation::BringOffline => {
                self.stop_pingers().await;
                self.close_children().await;
                self.vcu_mut()?.state = VcuState::Offline;
                Ok(())
            }
            Operation::Recovery => {
                self.vcu_mut()?.state = VcuState::Recovery;
                Ok(())
            }
            Operation::Restart => {
                self.vcu_mut()?.state = VcuState::Booting;
                Ok(())
            }
            Operation::BootedForce => {
                self.vcu_mut()?.state = VcuState::Idle;
                Ok(())
            }
            Operation::NoOp => Ok(()),
            Operation::PwrSupplyCmd | Operation::SerialCmd => Err(CommandFault::Warning(format!(
                "operation {:?} cannot target a VCU directly",
                cmd.operation
            ))),
            other => Err(CommandFault::Warning(format!("unhandled VCU operation {other:?}"))),
        }
    }

    fn vcu_mut(&mut self) -> Result<&mut VcuRuntime, CommandFault> {
        self.vcu
            .as_mut()
            .ok_or_else(|| CommandFault::Fatal(format!("component '{}' is not a VCU", self.name)))
    }

    fn spawn_pingers(&mut self) {
        let Some(vcu) = self.vcu.as_mut() else { return };
        for (child_name, role) in [("sga", Role::Sga), ("hpa", Role::Hpa)] {
            if let Some(SubcomponentConfig::RemoteShell { hostname, port, tunnel_via }) = vcu.config.get(child_name) {
                let driver = RemoteShellDriver::new(hostname.clone(), *port, tunnel_via.clone());
                let handle = pinger::start(driver);
                match role {
                    Role::Sga => vcu.sga_pinger = Some(handle),
                    Role::Hpa => vcu.hpa_pinger = Some(handle),
                }
            }
        }
    }

    /// `ENABLE` powers on both PSU channels before the VCU starts booting
    /// (SPEC_FULL.md §6's command table). A VCU with no configured `psu`
    /// child has nothing to enable; a failure to open or enable is a
    /// warning, not fatal -- booting still proceeds and the fault shows up
    /// on the next `readState` as `driver_fault` telemetry.
    async fn enable_psu_outputs(&mut self) {
        let Some(psu) = self.find_child_mut("psu") else { return };
        if psu.kind != ComponentKind::PowerSupply {
            return;
        }
        let Some(driver) = psu.driver.as_mut() else { return };
        if let Err(e) = driver.open().await {
            warn!("psu open failed during enable: {e}");
            return;
        }
        for verb in ["set_output_channel1", "set_output_channel2"] {
            if let Err(e) = driver.invoke(verb, &Value::Bool(true)).await {
                warn!("psu {verb} failed during enable: {e}");
            }
        }
    }

    async fn stop_pingers(&mut self) {
        let Some(vcu) = self.vcu.as_mut() else { return };
        if let Some(p) = vcu.sga_pinger.take() {
            p.close().await;
        }
        if let Some(p) = vcu.hpa_pinger.take() {
            p.close().await;
        }
    }

    async fn close_children(&mut self) {
        for (_, child) in self.children.iter_mut() {
            if let Some(driver) = child.driver.as_mut() {
                let _ = driver.close().await;
            }
        }
    }

    /// `POWER_OFF` closes then recreates every child from the VCU's stored
    /// configuration (SPEC_FULL.md §4.3), discarding any driver-internal
    /// state accumulated since `ENABLE` -- unlike `BRING_OFFLINE`, which
    /// drops children without recreating them.
    fn rebuild_children(&mut self) {
        let Some(vcu) = self.vcu.as_ref() else { return };
        self.children = build_children(&vcu.config);
    }

    /// Consult pinger snapshots and move `booting <-> idle`. Recurses into
    /// every VCU in the tree; non-VCU nodes are no-ops.
    pub fn check_state<'a>(&'a mut self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(vcu) = self.vcu.as_mut() {
                match vcu.state {
                    VcuState::Booting if vcu.both_endpoints_connected() => vcu.state = VcuState::Idle,
                    VcuState::Idle if !vcu.both_endpoints_connected() => vcu.state = VcuState::Booting,
                    _ => {}
                }
            }
            for (_, child) in self.children.iter_mut() {
                child.check_state().await;
            }
        })
    }

    /// After a cycle's dispatch, any VCU still sitting in the transient
    /// `command` state (bumped by `pre_transition` but never claimed by a
    /// VCU-targeted operation) returns to `idle`.
    pub fn complete_commands(&mut self) {
        if let Some(vcu) = self.vcu.as_mut() {
            if vcu.state == VcuState::Command {
                vcu.state = VcuState::Idle;
            }
        }
        for (_, child) in self.children.iter_mut() {
            child.complete_commands();
        }
    }

    /// Read every leaf driver's state and this node's own VCU state (if
    /// any) into its keeper, then drain the whole subtree into one flat,
    /// fully-qualified point list.
    pub fn gather_and_drain<'a>(&'a mut self, timestamp: f64, prefix: &'a str) -> BoxFuture<'a, Vec<TelemetryPoint>> {
        Box::pin(async move {
            if let Some(driver) = self.driver.as_mut() {
                match driver.read_state().await {
                    Ok(state) => {
                        for (channel, value) in state {
                            self.keeper.record(&channel, timestamp, value);
                        }
                    }
                    Err(fault) => {
                        self.keeper.record("driver_fault", timestamp, TelemetryValue::String(fault.to_string()));
                    }
                }
            }
            if let Some(vcu) = &self.vcu {
                self.keeper
                    .record("vcu_state", timestamp, TelemetryValue::String(vcu.state.as_str().to_string()));
            }

            let mut points = self.keeper.drain_own(prefix);
            let child_prefix = format!("{prefix}{}.", self.name);
            for (_, child) in self.children.iter_mut() {
                points.extend(child.gather_and_drain(timestamp, &child_prefix).await);
            }
            points
        })
    }
}

enum Role {
    Sga,
    Hpa,
}

/// Build the whole tree from a resolved [`Config`]: a synthetic root, one
/// child per configured VCU, each with its configured subcomponent leaves.
pub fn build_tree(config: &Config) -> Component {
    // "VCU HIL" matches `original_source/vcuhil_service.py::setup`'s
    // `HIL('VCU HIL')` and SPEC_FULL.md §8's literal scenario naming
    // (`VCU HIL.donatello.vcu_state`) -- every telemetry point is prefixed
    // by this root name on its way out.
    let mut root = Component::leaf("VCU HIL", ComponentKind::Root, None);
    for (vcu_name, vcu_config) in &config.vcus {
        let mut vcu = Component::leaf(vcu_name.clone(), ComponentKind::Vcu, None);
        vcu.vcu = Some(VcuRuntime::new(vcu_config.clone()));
        vcu.children = build_children(vcu_config);
        root.children.push((vcu_name.clone(), vcu));
    }
    root
}

fn build_children(config: &VcuConfig) -> Vec<(String, Component)> {
    config
        .iter()
        .map(|(name, sub)| (name.clone(), build_leaf(name, sub)))
        .collect()
}

/// Map one configured subcomponent to a leaf Component. `serial_line`,
/// `vlan` and `generic` leaves get no driver wired up automatically here:
/// serial transports are generic over an externally attached
/// `AsyncRead + AsyncWrite` (SPEC_FULL.md §4.1) and vlan/generic leaves
/// exist in the tree purely for telemetry namespacing, not control -- both
/// documented limitations, noted in DESIGN.md.
fn build_leaf(name: &str, config: &SubcomponentConfig) -> Component {
    match config {
        SubcomponentConfig::PowerSupply { host, port } => {
            let driver: Box<dyn Driver> = Box::new(PowerSupplyDriver::new(host.clone(), *port));
            Component::leaf(name, ComponentKind::PowerSupply, Some(driver))
        }
        SubcomponentConfig::RemoteShell { hostname, port, tunnel_via } => {
            let driver: Box<dyn Driver> = Box::new(RemoteShellDriver::new(hostname.clone(), *port, tunnel_via.clone()));
            Component::leaf(name, ComponentKind::RemoteShell, Some(driver))
        }
        SubcomponentConfig::SerialLine { .. } => Component::leaf(name, ComponentKind::SerialLine, None),
        SubcomponentConfig::Vlan { .. } => Component::leaf(name, ComponentKind::Vlan, None),
        SubcomponentConfig::Generic {} => Component::leaf(name, ComponentKind::Generic, None),
    }
}
