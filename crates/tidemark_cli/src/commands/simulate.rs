//! Simulate command implementation.
//!
//! Runs several devices against one in-process [`SyncServer`]. Each device
//! keeps its own local store and pending queue and talks to the server over
//! the loopback HTTP transport, so every request goes through the real wire
//! encoding.

use super::{OutputFormat, ResolveStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tidemark_sync_engine::{
    HttpTransport, LocalStore, LoopbackClient, LoopbackServer, MemoryLocalStore,
    MemoryPendingQueue, ProtocolSyncClient, RepositorySyncOrchestrator, Resolution, SyncConfig,
    SyncError, SyncResult,
};
use tidemark_sync_protocol::{
    CborSerializer, LogicalTime, PendingChange, SyncConflict, SyncEntity,
};
use tidemark_sync_server::{ServerConfig, SyncServer};
use tracing::info;

const PRINCIPAL: &str = "simulation";

/// A note edited by the simulated devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Logical id.
    pub id: String,
    /// Title line.
    pub title: String,
}

impl SyncEntity for Note {
    const ENTITY_TYPE: &'static str = "note";

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of devices.
    pub devices: usize,
    /// Notes created by each device.
    pub notes: usize,
    /// Whether to force a concurrent edit.
    pub conflict: bool,
    /// Resolution applied by the device that sees the conflict.
    pub resolve: ResolveStrategy,
}

/// Errors raised by the simulation.
#[derive(Debug, Error)]
pub enum SimulateError {
    /// The options cannot produce a meaningful run.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// A device failed outside a sync cycle.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Devices ended with different contents.
    #[error("devices diverged: {0}")]
    Diverged(String),
}

/// One sync cycle as seen by one device.
#[derive(Debug, Serialize)]
pub struct CycleSummary {
    /// Device that ran the cycle.
    pub device: String,
    /// Simulation phase.
    pub phase: &'static str,
    /// Updates received.
    pub pulled: usize,
    /// Updates applied locally.
    pub applied: usize,
    /// Changes accepted by the server.
    pub pushed: usize,
    /// Changes left queued.
    pub failed: usize,
    /// Conflicts detected.
    pub conflicts: usize,
    /// Outcome of the cycle.
    pub outcome: String,
    /// Watermark after the cycle.
    pub watermark: LogicalTime,
}

/// Result of a simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationSummary {
    /// Number of devices.
    pub devices: usize,
    /// Notes created per device.
    pub notes_per_device: usize,
    /// Every cycle in execution order.
    pub cycles: Vec<CycleSummary>,
    /// Conflicts resolved during the run.
    pub conflicts_resolved: usize,
    /// Final server revision.
    pub server_revision: u64,
    /// Live notes on the server.
    pub server_notes: usize,
    /// Notes held by each device at the end.
    pub device_notes: usize,
    /// Whether every device ended with the same notes.
    pub converged: bool,
}

/// Routes loopback requests to the shared server.
struct ServerHandle(Arc<SyncServer>);

impl LoopbackServer for ServerHandle {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

type Client =
    ProtocolSyncClient<Note, CborSerializer<Note>, HttpTransport<LoopbackClient<ServerHandle>>>;
type Orchestrator =
    RepositorySyncOrchestrator<Note, MemoryLocalStore<Note>, MemoryPendingQueue<Note>, Client>;

struct Device {
    name: String,
    orchestrator: Orchestrator,
    watermark: LogicalTime,
}

impl Device {
    fn connect(server: &Arc<SyncServer>, name: String) -> Self {
        let config = SyncConfig::new(PRINCIPAL, name.clone(), "loopback://tidemark");
        let transport = HttpTransport::new(
            config.server_url.clone(),
            LoopbackClient::new(ServerHandle(Arc::clone(server))),
        );
        let client = ProtocolSyncClient::new(config, CborSerializer::new(), transport);
        Self {
            name,
            orchestrator: RepositorySyncOrchestrator::new(
                MemoryLocalStore::new(),
                MemoryPendingQueue::new(),
                client,
            ),
            watermark: 0,
        }
    }

    fn save(&self, note: Note, create: bool) -> SyncResult<()> {
        self.orchestrator.store().upsert(note.clone())?;
        let change = if create {
            PendingChange::create(note)
        } else {
            PendingChange::update(note)
        };
        self.orchestrator.enqueue_change(change)?;
        Ok(())
    }

    fn sync(
        &mut self,
        phase: &'static str,
        cycles: &mut Vec<CycleSummary>,
    ) -> SyncResult<Vec<SyncConflict<Note>>> {
        let report = self.orchestrator.run_sync_cycle(self.watermark)?;
        self.watermark = report.watermark;
        cycles.push(CycleSummary {
            device: self.name.clone(),
            phase,
            pulled: report.pulled_count,
            applied: report.applied_count,
            pushed: report.pushed_success_count,
            failed: report.pushed_failed_count,
            conflicts: report.conflicts.len(),
            outcome: format!("{:?}", report.outcome),
            watermark: report.watermark,
        });
        Ok(report.conflicts)
    }

    fn notes(&self) -> Vec<Note> {
        let mut notes = self.orchestrator.store().entities();
        notes.sort_by(|a, b| a.id.cmp(&b.id));
        notes
    }
}

/// Runs the simulate command.
pub fn run(
    options: &SimulateOptions,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = simulate(options)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_text_output(&summary),
    }

    if !summary.converged {
        return Err(SimulateError::Diverged("final contents differ".into()).into());
    }
    Ok(())
}

/// Runs the simulation and returns its summary.
pub fn simulate(options: &SimulateOptions) -> Result<SimulationSummary, SimulateError> {
    if options.devices == 0 {
        return Err(SimulateError::InvalidOptions("at least one device is required".into()));
    }
    if options.conflict && (options.devices < 2 || options.notes == 0) {
        return Err(SimulateError::InvalidOptions(
            "a conflict needs two devices and at least one note".into(),
        ));
    }

    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let mut devices: Vec<Device> = (0..options.devices)
        .map(|i| Device::connect(&server, format!("device-{}", i)))
        .collect();
    let mut cycles = Vec::new();

    for (i, device) in devices.iter().enumerate() {
        for j in 0..options.notes {
            let id = format!("d{}-n{}", i, j);
            device.save(
                Note {
                    title: format!("note {} from {}", j, device.name),
                    id,
                },
                true,
            )?;
        }
    }

    // Two rounds so that early devices also see the notes of later ones.
    for phase in ["create", "spread"] {
        for device in devices.iter_mut() {
            device.sync(phase, &mut cycles)?;
        }
    }

    let mut conflicts_resolved = 0;
    if options.conflict {
        conflicts_resolved = run_conflict(&mut devices, options.resolve, &mut cycles)?;
    }

    for phase in ["settle", "final"] {
        for device in devices.iter_mut() {
            device.sync(phase, &mut cycles)?;
        }
    }

    let reference = devices[0].notes();
    let converged = devices.iter().all(|device| device.notes() == reference);
    let summary = SimulationSummary {
        devices: options.devices,
        notes_per_device: options.notes,
        cycles,
        conflicts_resolved,
        server_revision: server.revision(),
        server_notes: server.store().live_count(PRINCIPAL),
        device_notes: reference.len(),
        converged,
    };
    info!(
        devices = summary.devices,
        revision = summary.server_revision,
        converged,
        "simulation finished"
    );
    Ok(summary)
}

/// Edits the first note on two devices and resolves the resulting conflict.
fn run_conflict(
    devices: &mut [Device],
    strategy: ResolveStrategy,
    cycles: &mut Vec<CycleSummary>,
) -> Result<usize, SimulateError> {
    let id = "d0-n0";
    let (winner, rest) = devices.split_at_mut(1);
    let winner = &mut winner[0];
    let loser = &mut rest[0];

    loser.save(note(id, format!("edited on {}", loser.name)), false)?;
    winner.save(note(id, format!("edited on {}", winner.name)), false)?;
    winner.sync("edit", cycles)?;

    let conflicts = loser.sync("edit", cycles)?;
    let mut resolved = 0;
    for conflict in conflicts {
        let resolution = resolve(&conflict, strategy);
        loser
            .orchestrator
            .resolve_conflict(&conflict.entity_id, resolution)?;
        resolved += 1;
    }
    loser.sync("resolve", cycles)?;
    Ok(resolved)
}

fn resolve(conflict: &SyncConflict<Note>, strategy: ResolveStrategy) -> Resolution<Note> {
    let keep = |side: &Option<Note>| match side {
        Some(note) => Resolution::Keep(note.clone()),
        None => Resolution::Delete,
    };
    match strategy {
        ResolveStrategy::Local => keep(&conflict.local_entity),
        ResolveStrategy::Remote => keep(&conflict.remote_entity),
        ResolveStrategy::Delete => Resolution::Delete,
        ResolveStrategy::Merge => match (&conflict.local_entity, &conflict.remote_entity) {
            (Some(local), Some(remote)) => Resolution::Keep(note(
                &conflict.entity_id,
                format!("{} + {}", local.title, remote.title),
            )),
            (Some(only), None) | (None, Some(only)) => Resolution::Keep(only.clone()),
            (None, None) => Resolution::Delete,
        },
    }
}

fn note(id: &str, title: String) -> Note {
    Note {
        id: id.to_string(),
        title,
    }
}

fn print_text_output(summary: &SimulationSummary) {
    println!("Tidemark Sync Simulation");
    println!("========================");
    println!();
    println!("Devices:          {}", summary.devices);
    println!("Notes per device: {}", summary.notes_per_device);
    println!();
    println!("Cycles:");
    for cycle in &summary.cycles {
        println!(
            "  [{:<7}] {:<10} pulled {:>3}  applied {:>3}  pushed {:>3}  failed {:>3}  conflicts {:>2}  watermark {:>4}  {}",
            cycle.phase,
            cycle.device,
            cycle.pulled,
            cycle.applied,
            cycle.pushed,
            cycle.failed,
            cycle.conflicts,
            cycle.watermark,
            cycle.outcome
        );
    }
    println!();
    println!("Conflicts resolved: {}", summary.conflicts_resolved);
    println!();
    println!("Server:");
    println!("  Revision:   {}", summary.server_revision);
    println!("  Live notes: {}", summary.server_notes);
    println!();
    println!(
        "Result: {} ({} notes per device)",
        if summary.converged {
            "converged"
        } else {
            "DIVERGED"
        },
        summary.device_notes
    );
}
