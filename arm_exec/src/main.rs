//! # Arm Control Executable
//!
//! This executable owns the serial link to the arm's control board and
//! serves the RPC surface consoles drive the arm through. Requests are
//! handled one at a time, the board is half duplex and cannot take more.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::info;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

// Internal
use arm_lib::auth::AuthService;
use arm_lib::params::ArmExecParams;
use arm_lib::robot::{RobotConfig, RobotController};
use arm_lib::rpc_server::{RpcDispatch, RpcServer};
use arm_lib::serial::UsbSerialLink;
use arm_lib::task_mgr::TaskManager;
use comms_if::net::zmq;
use util::{
    audit::AuditTrail,
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Pause between polls of the REP socket when no request is waiting.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("arm_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution
    info!("Arm Control Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: ArmExecParams =
        util::params::load("arm_exec.toml").wrap_err("Failed to load the parameter file")?;

    info!("Parameters loaded");

    // ---- SERVICE INITIALISATION ----

    let sw_root = host::get_arm_sw_root().wrap_err("Failed to find the software root")?;

    let auth = AuthService::load(sw_root.join(&params.users_file))
        .wrap_err("Failed to load the user database")?;

    let tasks = TaskManager::load(sw_root.join(&params.tasks_file))
        .wrap_err("Failed to load the task store")?;

    let audit = AuditTrail::new(&session.file_path("audit.csv"), "arm_exec")
        .wrap_err("Failed to open the audit trail")?;

    let controller = Arc::new(Mutex::new(RobotController::new(
        UsbSerialLink::new(),
        RobotConfig::from_params(&params),
    )));

    info!("Services initialised");

    // ---- SERVER INITIALISATION ----

    let ctx = zmq::Context::new();

    let dispatch = RpcDispatch::new(controller, auth, tasks, audit, params.clone());

    let mut server = RpcServer::new(&ctx, &params.rpc_endpoint, dispatch)
        .wrap_err("Failed to initialise the RPC server")?;

    // ---- MAIN LOOP ----

    info!("Initialisation complete, serving requests");

    loop {
        let handled = server.step().wrap_err("RPC server failure")?;

        if !handled {
            thread::sleep(IDLE_SLEEP);
        }
    }
}
