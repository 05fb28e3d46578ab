//! Update client - high-level orchestrator for the poll/install loop.
//!
//! One background task runs the poll loop: sleep, query the server for
//! pending work, judge any deployment against the persisted counter pair,
//! and either close it out with a status report or download the artifact
//! into the secondary bank and hand control to the bootloader. Repeated
//! cycle failures end in a fail-safe reboot.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::acid::{ACID_UNSET, AcidField, AcidStore};
use crate::boot::{Bootloader, Reboot};
use crate::config::ClientConfig;
use crate::events::{FotaEvent, FotaObserver, TracingObserver, UpdatePhase};
use crate::flash::{BlockWriter, FlashDevice, FlashLayout};
use crate::http;
use crate::json::{parse_deployment, parse_poll_resource, Deployment};
use crate::transport::{ConnectionRole, NetDriver, Transport, RECV_BUF_SIZE};

/// Consecutive failed poll cycles tolerated before the fail-safe reboot.
pub const MAX_SERVER_FAILURES: u32 = 5;

const ROLE: ConnectionRole = ConnectionRole::UpdateServer;

/// Server-facing terminal result of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedbackResult {
    Success,
    Failure,
}

impl FeedbackResult {
    fn as_str(self) -> &'static str {
        match self {
            FeedbackResult::Success => "success",
            FeedbackResult::Failure => "failure",
        }
    }
}

/// Server-facing execution state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedbackExecution {
    Closed,
    Proceeding,
}

impl FeedbackExecution {
    fn as_str(self) -> &'static str {
        match self {
            FeedbackExecution::Closed => "closed",
            FeedbackExecution::Proceeding => "proceeding",
        }
    }
}

/// How one poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to do, or the pending deployment was closed out.
    Idle,
    /// An image was written and marked for swap; a reboot must follow.
    Installed,
}

/// Extract the request path out of an absolute or server-relative href.
fn resource_path(href: &str) -> Result<&str> {
    if href.starts_with('/') {
        return Ok(href);
    }
    let scheme_end = href
        .find("://")
        .map(|i| i + 3)
        .with_context(|| format!("unsupported href: {href}"))?;
    let path_start = href[scheme_end..]
        .find('/')
        .map(|i| i + scheme_end)
        .with_context(|| format!("href has no path: {href}"))?;
    Ok(&href[path_start..])
}

/// The update client state machine.
pub struct UpdateClient<N, F, B, R, O>
where
    N: NetDriver,
    F: FlashDevice,
    B: Bootloader,
    R: Reboot,
    O: FotaObserver,
{
    config: ClientConfig,
    transport: Arc<Transport<N>>,
    flash: F,
    layout: FlashLayout,
    acid_store: AcidStore,
    boot: B,
    reboot: R,
    observer: Arc<O>,
    poll_interval: Duration,
    failures: u32,
    phase: UpdatePhase,
}

impl<N, F, B, R> UpdateClient<N, F, B, R, TracingObserver>
where
    N: NetDriver,
    F: FlashDevice,
    B: Bootloader,
    R: Reboot,
{
    /// Create a client with the default tracing observer.
    pub fn new(
        config: ClientConfig,
        driver: N,
        flash: F,
        layout: FlashLayout,
        boot: B,
        reboot: R,
    ) -> Self {
        Self::with_observer(config, driver, flash, layout, boot, reboot, Arc::new(TracingObserver))
    }
}

impl<N, F, B, R, O> UpdateClient<N, F, B, R, O>
where
    N: NetDriver,
    F: FlashDevice,
    B: Bootloader,
    R: Reboot,
    O: FotaObserver,
{
    /// Create a client with a custom observer.
    pub fn with_observer(
        config: ClientConfig,
        driver: N,
        flash: F,
        layout: FlashLayout,
        boot: B,
        reboot: R,
        observer: Arc<O>,
    ) -> Self {
        let transport = Arc::new(Transport::new(driver, config.server_host.clone()));
        let acid_store = AcidStore::new(&layout);
        let poll_interval = Duration::from_secs(u64::from(config.poll_interval_secs));
        Self {
            config,
            transport,
            flash,
            layout,
            acid_store,
            boot,
            reboot,
            observer,
            poll_interval,
            failures: 0,
            phase: UpdatePhase::Idle,
        }
    }

    pub fn transport(&self) -> &Transport<N> {
        &self.transport
    }

    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    fn set_phase(&mut self, to: UpdatePhase) {
        if self.phase != to {
            self.observer.on_event(&FotaEvent::PhaseChanged {
                from: self.phase,
                to,
            });
            self.phase = to;
        }
    }

    fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.config.recv_timeout_ms)
    }

    /// Startup path, run once before the poll loop.
    ///
    /// Loads the counter pair, logs the secondary bank version when one is
    /// readable, and if the running image is a fresh swap that has not
    /// been confirmed yet, confirms it, promotes `update` to `current` and
    /// invalidates the now stale secondary bank.
    pub fn start(&mut self) -> Result<()> {
        let acid = self.acid_store.read(&mut self.flash)?;
        info!(current = acid.current, update = acid.update, "Update counters loaded");

        match self.boot.read_bank_header(self.layout.bank_offset) {
            Ok(version) => debug!(version = %version, "Secondary bank image"),
            Err(e) => debug!(error = %e, "No readable image in secondary bank"),
        }

        if !self.boot.is_image_confirmed() {
            info!(action_id = acid.update, "Confirming newly swapped image");
            self.boot.confirm_image()?;
            // An unset `update` means the image got here without this
            // client installing it; there is no action id to promote.
            if acid.update != ACID_UNSET {
                self.acid_store
                    .write_field(&mut self.flash, AcidField::Current, acid.update)?;
            }
            self.boot.erase_secondary_bank()?;
        }

        Ok(())
    }

    /// Run the poll loop until a reboot is required.
    ///
    /// Returns after requesting the reboot, whether for a successful
    /// install or for the fail-safe path.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<()> {
        loop {
            thread::sleep(self.poll_interval);

            if !self.transport.driver().ready() {
                debug!("Network interface not ready, skipping cycle");
                continue;
            }

            match self.poll_cycle() {
                Ok(CycleOutcome::Installed) => {
                    self.observer.on_event(&FotaEvent::RebootRequested {
                        reason: "update installed".into(),
                    });
                    self.reboot.reboot();
                    return Ok(());
                }
                Ok(CycleOutcome::Idle) => {
                    self.failures = 0;
                }
                Err(e) => {
                    self.failures += 1;
                    warn!(failures = self.failures, error = %e, "Poll cycle failed");
                    self.observer.on_event(&FotaEvent::CycleFailed {
                        failures: self.failures,
                        message: e.to_string(),
                    });
                    if self.failures >= MAX_SERVER_FAILURES {
                        self.observer.on_event(&FotaEvent::RebootRequested {
                            reason: format!("{} consecutive cycle failures", self.failures),
                        });
                        self.reboot.reboot();
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run one poll cycle: query the base resource, evaluate any pending
    /// deployment, and install or close it out.
    pub fn poll_cycle(&mut self) -> Result<CycleOutcome> {
        let transport = Arc::clone(&self.transport);
        let _iface = transport.lock_interface();

        self.set_phase(UpdatePhase::Polling);
        let request = http::build_get(&self.config.host_header(), &self.config.controller_path());
        let body = self.exchange(&request)?;
        let poll = parse_poll_resource(&body)?;

        if let Some(secs) = poll.sleep_secs {
            if Duration::from_secs(u64::from(secs)) != self.poll_interval {
                info!(secs, "Server adjusted the poll interval");
                self.poll_interval = Duration::from_secs(u64::from(secs));
                self.observer
                    .on_event(&FotaEvent::PollIntervalChanged { secs });
            }
        }

        // Best effort: a failed config data upload does not fail the cycle.
        if poll.config_data_requested {
            if let Err(e) = self.report_config_data() {
                warn!(error = %e, "Config data upload failed");
            }
        }

        let Some(base_href) = poll.deployment_base_href else {
            debug!("No deployment pending");
            self.set_phase(UpdatePhase::Idle);
            return Ok(CycleOutcome::Idle);
        };

        self.set_phase(UpdatePhase::Deciding);
        let dep_path = resource_path(&base_href)?.to_owned();
        let request = http::build_get(&self.config.host_header(), &dep_path);
        let body = self.exchange(&request)?;
        let dep = parse_deployment(&body)?;
        let action_id = dep.action_id.context("deployment without an action id")?;

        let acid = self.acid_store.read(&mut self.flash)?;
        if acid.current == action_id {
            info!(action_id, "Deployment already installed and confirmed");
            self.set_phase(UpdatePhase::ReportingAlreadyCurrent);
            self.report_update_status(action_id, FeedbackResult::Success, FeedbackExecution::Closed)?;
            self.set_phase(UpdatePhase::Idle);
            return Ok(CycleOutcome::Idle);
        }
        if acid.update == action_id {
            // Attempted before and never confirmed running; do not
            // re-download a known-bad or still pending artifact.
            warn!(action_id, "Deployment already attempted, closing as failed");
            self.set_phase(UpdatePhase::ReportingAlreadyFailed);
            self.report_update_status(action_id, FeedbackResult::Failure, FeedbackExecution::Closed)?;
            self.set_phase(UpdatePhase::Idle);
            return Ok(CycleOutcome::Idle);
        }

        if dep.download_href.is_none() {
            debug!(action_id, "Deployment carries no download link");
            self.set_phase(UpdatePhase::Idle);
            return Ok(CycleOutcome::Idle);
        }
        if dep.rejected {
            warn!(action_id, "Unsupported deployment shape, closing as failed");
            self.set_phase(UpdatePhase::ReportFailure);
            self.report_update_status(action_id, FeedbackResult::Failure, FeedbackExecution::Closed)?;
            self.set_phase(UpdatePhase::Idle);
            return Ok(CycleOutcome::Idle);
        }
        if dep.file_size > self.layout.bank_size {
            warn!(
                action_id,
                file_size = dep.file_size,
                bank_size = self.layout.bank_size,
                "Artifact does not fit the secondary bank"
            );
            self.set_phase(UpdatePhase::ReportFailure);
            self.report_update_status(action_id, FeedbackResult::Failure, FeedbackExecution::Closed)?;
            self.set_phase(UpdatePhase::Idle);
            return Ok(CycleOutcome::Idle);
        }

        self.observer.on_event(&FotaEvent::DeploymentFound {
            action_id,
            file_size: dep.file_size,
        });
        self.set_phase(UpdatePhase::Downloading);

        if let Err(e) = self.install(&dep, action_id) {
            self.set_phase(UpdatePhase::ReportFailure);
            // Best effort; the install error is what matters.
            if let Err(report_err) =
                self.report_update_status(action_id, FeedbackResult::Failure, FeedbackExecution::Closed)
            {
                warn!(error = %report_err, "Failure report not delivered");
            }
            self.set_phase(UpdatePhase::Idle);
            return Err(e);
        }

        self.set_phase(UpdatePhase::InstalledPendingReboot);
        Ok(CycleOutcome::Installed)
    }

    /// Download the artifact into the secondary bank, verify the length,
    /// mark the bank for swap and persist the attempted action id.
    fn install(&mut self, dep: &Deployment, action_id: i32) -> Result<()> {
        self.report_update_status(action_id, FeedbackResult::Success, FeedbackExecution::Proceeding)?;

        let href = dep.download_href.as_deref().ok_or_else(|| anyhow!("missing download href"))?;
        let request = http::build_get(&self.config.host_header(), resource_path(href)?);

        self.flash.set_write_protection(false);
        let erased = self.flash.erase(self.layout.bank_offset, self.layout.bank_size);
        self.flash.set_write_protection(true);
        erased.context("erasing secondary bank")?;

        self.transport.connect(ROLE, self.config.server_port)?;
        let timeout = self.recv_timeout();
        let bank_offset = self.layout.bank_offset;
        let total = dep.file_size;
        let observer = Arc::clone(&self.observer);
        let mut writer = BlockWriter::new();
        let flash = &mut self.flash;

        let result = http::download(
            &self.transport,
            ROLE,
            &request,
            timeout,
            total,
            &mut |chunk| {
                writer.write(flash, bank_offset, chunk, false)?;
                Ok(())
            },
            &mut |current| observer.on_event(&FotaEvent::Progress { current, total }),
        );
        self.transport.close(ROLE);
        result.context("artifact download")?;

        writer.write(&mut self.flash, bank_offset, &[], true)?;
        if writer.bytes_written() != total {
            bail!(
                "flash write total {} does not match artifact size {}",
                writer.bytes_written(),
                total
            );
        }

        self.boot.request_upgrade()?;
        self.acid_store
            .write_field(&mut self.flash, AcidField::Update, action_id)?;
        info!(action_id, bytes = total, "Image installed, swap requested");
        Ok(())
    }

    /// One request/response exchange on a fresh connection.
    fn exchange(&mut self, request: &str) -> Result<String> {
        self.transport.connect(ROLE, self.config.server_port)?;
        let mut buf = [0u8; RECV_BUF_SIZE];
        let result = http::query(&self.transport, ROLE, request, &mut buf, self.recv_timeout());
        self.transport.close(ROLE);
        let range = result?;
        Ok(std::str::from_utf8(&buf[range])
            .context("response body is not valid UTF-8")?
            .to_owned())
    }

    fn report_update_status(
        &mut self,
        action_id: i32,
        result: FeedbackResult,
        execution: FeedbackExecution,
    ) -> Result<()> {
        let path = format!(
            "{}/deploymentBase/{}/feedback",
            self.config.controller_path(),
            action_id
        );
        let body = format!(
            r#"{{"id":"{action_id}","status":{{"result":{{"finished":"{}"}},"execution":"{}"}}}}"#,
            result.as_str(),
            execution.as_str()
        );
        let request = http::build_post(&self.config.host_header(), &path, &body);
        self.exchange(&request)?;

        self.observer.on_event(&FotaEvent::FeedbackSent {
            action_id,
            success: result == FeedbackResult::Success,
        });
        Ok(())
    }

    /// Upload the device's static config data.
    fn report_config_data(&mut self) -> Result<()> {
        let path = format!("{}/configData", self.config.controller_path());
        let body = format!(
            r#"{{"mode":"merge","data":{{"board":"{}","serial":"{:x}"}},"status":{{"result":{{"finished":"success"}},"execution":"closed"}}}}"#,
            self.config.device_name, self.config.serial_number
        );
        let request = http::build_put(&self.config.host_header(), &path, &body);
        self.exchange(&request)?;
        debug!("Config data uploaded");
        Ok(())
    }
}
