pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::{
    ConnectedMissionControl, Dashboard, DashboardView, DayPlanInput, GoalEdit, GoalInput,
    MissionControl,
};
pub use application::session::{SessionPolicy, SessionState};
pub use application::store::StoreState;
pub use infrastructure::error::InfraError;

use application::bootstrap::bootstrap_workspace;
use infrastructure::logging::init_logging;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

/// Prepares `workspace_root`, installs logging and restores the session.
///
/// The returned guard flushes the log file when dropped.
pub async fn run(workspace_root: &Path) -> Result<(ConnectedMissionControl, WorkerGuard), InfraError> {
    let bootstrap = bootstrap_workspace(workspace_root)?;
    let guard = init_logging(&bootstrap.logs_dir, &bootstrap.configs.app.log_level)?;
    tracing::info!(
        workspace_root = %bootstrap.workspace_root.display(),
        "workspace ready"
    );

    let app = ConnectedMissionControl::connect(workspace_root)?;
    app.start().await;
    Ok((app, guard))
}
