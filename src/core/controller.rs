//! Orchestration of one exposure: firewall rule, gateway mapping, status
//! display.
//!
//! ```text
//! Idle -> FirewallPending -> FirewallActive -> MappingPending -> Exposed -> Reporting
//!   ^                                                                        |
//!   +------------------------------- teardown -------------------------------+
//! ```
//!
//! The controller never rolls back inline. Once the rule is recorded in the
//! session, only [`CleanupCoordinator::teardown`] releases it.

use crate::audit::{self, EventType};
use crate::core::cleanup::{CleanupCoordinator, TeardownReport};
use crate::core::context::ExposureContext;
use crate::core::error::ExposeError;
use crate::core::firewall::{FirewallBackend, RuleOutcome};
use crate::core::gateway::GatewayBackend;
use crate::core::session::ExposureSession;
use crate::core::types::{
    ExposeRequest, FirewallRuleDescriptor, MappedAddress, PortMappingDescriptor, Protocol,
};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use strum::Display;
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ExposureState {
    Idle,
    FirewallPending,
    FirewallActive,
    MappingPending,
    Exposed,
    Reporting,
}

/// A completed exposure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exposure {
    pub request: ExposeRequest,
    pub rule_name: String,
    pub rule_outcome: RuleOutcome,
    pub address: MappedAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub refresh_interval: Duration,
    pub clear_screen: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10),
            clear_screen: true,
        }
    }
}

/// Why the reporting loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportExit {
    ExitCommand,
    Signal,
    InputClosed,
}

pub struct ExposureController<F, G: GatewayBackend> {
    ctx: Arc<ExposureContext<F, G>>,
    coordinator: CleanupCoordinator<F, G>,
    report_options: ReportOptions,
    state: Mutex<ExposureState>,
}

impl<F: FirewallBackend, G: GatewayBackend> ExposureController<F, G> {
    pub fn new(ctx: Arc<ExposureContext<F, G>>, report_options: ReportOptions) -> Self {
        Self {
            coordinator: CleanupCoordinator::new(Arc::clone(&ctx)),
            ctx,
            report_options,
            state: Mutex::new(ExposureState::Idle),
        }
    }

    /// The coordinator every exit path must end in
    pub fn coordinator(&self) -> CleanupCoordinator<F, G> {
        self.coordinator.clone()
    }

    pub fn context(&self) -> &Arc<ExposureContext<F, G>> {
        &self.ctx
    }

    pub fn session(&self) -> &ExposureSession<G::Handle> {
        &self.ctx.session
    }

    pub fn state(&self) -> ExposureState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ExposureState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!("Exposure state {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Opens the firewall and maps the port on the gateway.
    ///
    /// Leftovers of an earlier failed attempt are torn down first, so the
    /// session never holds two exposures.
    ///
    /// # Errors
    ///
    /// - `Firewall`: hard rule failure, nothing is held
    /// - `Discovery` / `Mapping`: the rule stays held until the next teardown
    pub async fn expose(&self, request: ExposeRequest) -> Result<Exposure, ExposeError> {
        let ExposeRequest { port, protocol } = request;

        if self.ctx.session.is_active() {
            info!("Releasing the previous exposure before exposing {protocol}/{port}");
            self.coordinator.teardown().await;
        }

        self.set_state(ExposureState::FirewallPending);
        let rule = FirewallRuleDescriptor::new(port, protocol);

        // Recorded before the tool runs: if this call is cancelled the rule
        // may still get created, and removing an absent rule is a no-op.
        self.ctx.session.record(Some(rule.clone()), None);

        let rule_outcome = match self.ctx.firewall.add_descriptor(&rule).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ctx.session.take_rule();
                self.audit(
                    EventType::AddRule,
                    &rule.name,
                    port,
                    protocol,
                    Some(e.to_string()),
                )
                .await;
                self.set_state(ExposureState::Idle);
                return Err(e.into());
            }
        };
        self.audit(EventType::AddRule, &rule.name, port, protocol, None)
            .await;
        self.set_state(ExposureState::FirewallActive);

        self.set_state(ExposureState::MappingPending);
        let handle = match self.ctx.gateway.discover().await {
            Ok(handle) => handle,
            Err(e) => {
                self.set_state(ExposureState::FirewallActive);
                return Err(e.into());
            }
        };

        let target = format!("{port}/{protocol}");
        let address = match self.ctx.gateway.add_mapping(&handle, port, protocol).await {
            Ok(address) => address,
            Err(e) => {
                self.audit(
                    EventType::AddMapping,
                    &target,
                    port,
                    protocol,
                    Some(e.to_string()),
                )
                .await;
                self.set_state(ExposureState::FirewallActive);
                return Err(e.into());
            }
        };

        self.ctx.session.record(
            None,
            Some(PortMappingDescriptor {
                port,
                protocol,
                external_address: address.external_address,
                control_handle: handle,
            }),
        );
        self.audit(EventType::AddMapping, &target, port, protocol, None)
            .await;
        self.set_state(ExposureState::Exposed);

        Ok(Exposure {
            request,
            rule_name: rule.name,
            rule_outcome,
            address,
        })
    }

    /// Shows the public address every refresh interval until a shutdown is
    /// signalled, `exit` is entered, or input ends.
    pub async fn report<R, W>(
        &self,
        exposure: &Exposure,
        input: &mut Lines<R>,
        shutdown: &mut watch::Receiver<bool>,
        out: &mut W,
    ) -> ReportExit
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        self.set_state(ExposureState::Reporting);
        render_status(out, exposure, false);

        let period = self.report_options.refresh_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;
                () = shutdown_requested(shutdown) => break ReportExit::Signal,
                line = input.next_line() => match line {
                    Ok(Some(line)) if line.trim() == "exit" => break ReportExit::ExitCommand,
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(_)) => {
                        let _ = writeln!(
                            out,
                            "[info] Exposure is active. Type exit or press Ctrl+C to stop."
                        );
                        let _ = out.flush();
                    }
                    Ok(None) => break ReportExit::InputClosed,
                    Err(e) => {
                        warn!("Failed to read input while reporting: {e}");
                        break ReportExit::InputClosed;
                    }
                },
                _ = ticker.tick() => render_status(out, exposure, self.report_options.clear_screen),
            }
        };

        info!("Leaving public mode: {exit:?}");
        self.set_state(ExposureState::Exposed);
        exit
    }

    /// Tears the exposure down and returns to `Idle`
    pub async fn shutdown(&self) -> TeardownReport {
        let report = self.coordinator.teardown().await;
        self.set_state(ExposureState::Idle);
        report
    }

    async fn audit(
        &self,
        event_type: EventType,
        target: &str,
        port: u16,
        protocol: Protocol,
        error: Option<String>,
    ) {
        audit::record(
            self.ctx.audit.as_ref(),
            event_type,
            target,
            port,
            protocol,
            error,
        )
        .await;
    }
}

/// Resolves once the shutdown flag is set. Never resolves if the sender
/// is gone without having set it.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn render_status<W: Write>(out: &mut W, exposure: &Exposure, clear: bool) {
    if let Err(e) = write_status(out, exposure, clear) {
        warn!("Failed to render status: {e}");
    }
}

fn write_status<W: Write>(out: &mut W, exposure: &Exposure, clear: bool) -> std::io::Result<()> {
    if clear {
        crossterm::queue!(
            out,
            crossterm::terminal::Clear(crossterm::terminal::ClearType::All),
            crossterm::cursor::MoveTo(0, 0)
        )?;
    }
    writeln!(out, "[info] Your public address: {}", exposure.address.endpoint())?;
    writeln!(out, "[info] Press Ctrl+C or type exit to quit.")?;
    out.flush()
}

/// Whether some local socket already owns `port`. Binding succeeds only
/// when nothing listens there yet.
pub async fn port_in_use(port: u16, protocol: Protocol) -> bool {
    let addr = (std::net::Ipv4Addr::UNSPECIFIED, port);
    match protocol {
        Protocol::Tcp => tokio::net::TcpListener::bind(addr).await.is_err(),
        Protocol::Udp => tokio::net::UdpSocket::bind(addr).await.is_err(),
    }
}
