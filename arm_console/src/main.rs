//! # Arm Operator Console
//!
//! Interactive console for driving the arm exec. Lines typed at the
//! prompt are parsed into commands, sent to the exec as JSON RPC requests
//! over a REQ socket, and the result or fault is printed back.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::Deserialize;
use serde_json::{json, Value};
use structopt::StructOpt;
use std::str::FromStr;

// Internal
use comms_if::net::{zmq, MonitoredSocket, SocketOptions};
use comms_if::rpc::{RpcRequest, RpcResponse};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "Arm $ ";

/// History file, kept next to the console's working directory.
const HISTORY_PATH: &str = ".arm_console_history";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ArmConsoleParams {
    /// Endpoint of the exec's RPC server
    rpc_endpoint: String,

    /// How long to wait for a reply in milliseconds
    recv_timeout_ms: i32,
}

/// The connection to the exec plus the console's login state.
struct Client {
    socket: MonitoredSocket,
    next_id: u64,
    token: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The operator vocabulary.
#[derive(Debug, StructOpt)]
#[structopt(name = "arm", no_version)]
enum ConsoleCmd {
    /// Open a session on the exec
    Login { username: String },

    /// Close the current session
    Logout,

    /// List every method the exec answers
    Help,

    /// Query the arm's status
    Status,

    /// Open the serial link to the arm
    Connect {
        /// Serial device override
        #[structopt(long)]
        device: Option<String>,

        /// Baud rate override
        #[structopt(long)]
        baud: Option<u32>,
    },

    /// Close the serial link
    Disconnect,

    /// Move the effector to a position in mm
    Move {
        x: f64,
        y: f64,
        z: f64,

        /// Feed rate in mm/min
        #[structopt(long)]
        speed: Option<f64>,
    },

    /// Home the arm (move to the origin)
    Home,

    /// Energise or de-energise the motors
    Motors { state: Switch },

    /// Switch the end effector
    Effector { state: Switch },

    /// Select the coordinate mode
    Mode { mode: CoordMode },

    /// List the stored tasks
    Tasks,

    /// Replay a stored task
    Run { id: String },

    /// Orders issued by the logged in user
    Report,

    /// All orders, admin only
    AdminReport {
        /// `user` or `outcome`
        #[structopt(long)]
        key: Option<String>,

        #[structopt(long)]
        value: Option<String>,
    },

    /// Audit rows for this session, admin only
    LogReport {
        /// `user` or `level`
        #[structopt(long)]
        key: Option<String>,

        #[structopt(long)]
        value: Option<String>,
    },

    /// List the live sessions, admin only
    Sessions,

    /// Add a user, admin only
    AddUser { username: String, role: String },

    /// Leave the console
    Exit,
}

#[derive(Debug, Clone, Copy)]
enum Switch {
    On,
    Off,
}

#[derive(Debug, Clone, Copy)]
enum CoordMode {
    Absolute,
    Relative,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FromStr for Switch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Switch::On),
            "off" => Ok(Switch::Off),
            other => Err(format!("expected `on` or `off`, got `{}`", other)),
        }
    }
}

impl Switch {
    fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

impl FromStr for CoordMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "absolute" | "abs" => Ok(CoordMode::Absolute),
            "relative" | "rel" => Ok(CoordMode::Relative),
            other => Err(format!(
                "expected `absolute` or `relative`, got `{}`",
                other
            )),
        }
    }
}

impl Client {
    fn new(ctx: &zmq::Context, params: &ArmConsoleParams) -> Result<Self> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            req_correlate: true,
            req_relaxed: true,
            recv_timeout: params.recv_timeout_ms,
            send_timeout: 1000,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::REQ, socket_options, &params.rpc_endpoint)
            .wrap_err("Could not create the socket to the exec")?;

        Ok(Self {
            socket,
            next_id: 1,
            token: None,
        })
    }

    /// Send one request and wait for the reply.
    fn call(&mut self, method: &str, params: Value) -> Result<Option<RpcResponse>> {
        let request = RpcRequest::new(self.next_id, method, self.token.clone(), params);
        self.next_id += 1;

        self.socket
            .send_str(&request.to_json()?)
            .wrap_err("Could not send the request, is the exec running?")?;

        let raw = match self.socket.recv_str()? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        Ok(Some(RpcResponse::from_json(&raw)?))
    }
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let params: ArmConsoleParams =
        util::params::load("arm_console.toml").wrap_err("Failed to load the parameter file")?;

    let ctx = zmq::Context::new();
    let mut client = Client::new(&ctx, &params)?;

    println!("Arm operator console, type `help` for the methods or `exit` to leave");

    let mut rl = DefaultEditor::new()?;
    if rl.load_history(HISTORY_PATH).is_err() {
        // First run, no history yet
    }

    loop {
        let readline = rl.readline(PROMPT);

        let line = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("Console error: {:?}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let _ = rl.add_history_entry(line.as_str());

        let cmd = match parse(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                // structopt renders its own usage text
                println!("{}", e);
                continue;
            }
        };

        if matches!(cmd, ConsoleCmd::Exit) {
            break;
        }

        if let Err(e) = run(&mut rl, &mut client, cmd) {
            println!("Error: {}", e);
        }
    }

    let _ = rl.save_history(HISTORY_PATH);

    println!("Bye");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse one console line into a command.
fn parse(line: &str) -> Result<ConsoleCmd, structopt::clap::Error> {
    let words = std::iter::once("arm").chain(line.split_whitespace());
    ConsoleCmd::from_iter_safe(words)
}

/// Turn a command into an RPC call and print the outcome.
fn run(rl: &mut DefaultEditor, client: &mut Client, cmd: ConsoleCmd) -> Result<()> {
    let (method, params) = match cmd {
        ConsoleCmd::Login { username } => {
            let password = rl.readline("Password: ")?;

            (
                "user.login",
                json!({
                    "username": username,
                    "password": password.trim(),
                    "client": "arm_console",
                }),
            )
        }
        ConsoleCmd::Logout => ("user.logout", Value::Null),
        ConsoleCmd::Help => ("help", Value::Null),
        ConsoleCmd::Status => ("robot.get_status", Value::Null),
        ConsoleCmd::Connect { device, baud } => (
            "robot.connect",
            json!({ "device": device, "baud": baud }),
        ),
        ConsoleCmd::Disconnect => ("robot.disconnect", Value::Null),
        ConsoleCmd::Move { x, y, z, speed } => (
            "robot.move",
            json!({ "x": x, "y": y, "z": z, "speed": speed }),
        ),
        ConsoleCmd::Home => (
            "robot.move",
            json!({ "x": 0.0, "y": 0.0, "z": 0.0 }),
        ),
        ConsoleCmd::Motors { state } => {
            if state.is_on() {
                ("robot.enable_motors", Value::Null)
            } else {
                ("robot.disable_motors", Value::Null)
            }
        }
        ConsoleCmd::Effector { state } => (
            "robot.set_effector",
            json!({ "active": state.is_on() }),
        ),
        ConsoleCmd::Mode { mode } => (
            "robot.set_coord_mode",
            json!({ "absolute": matches!(mode, CoordMode::Absolute) }),
        ),
        ConsoleCmd::Tasks => ("robot.list_tasks", Value::Null),
        ConsoleCmd::Run { id } => ("robot.execute_task", json!({ "id": id })),
        ConsoleCmd::Report => ("robot.get_report", Value::Null),
        ConsoleCmd::AdminReport { key, value } => (
            "robot.get_admin_report",
            json!({ "filter_key": key, "filter_value": value }),
        ),
        ConsoleCmd::LogReport { key, value } => (
            "robot.get_log_report",
            json!({ "filter_key": key, "filter_value": value }),
        ),
        ConsoleCmd::Sessions => ("user.list", Value::Null),
        ConsoleCmd::AddUser { username, role } => {
            let password = rl.readline("Password for the new user: ")?;

            (
                "user.add",
                json!({
                    "username": username,
                    "password": password.trim(),
                    "role": role,
                }),
            )
        }
        ConsoleCmd::Exit => unreachable!("exit is handled by the loop"),
    };

    let is_login = method == "user.login";

    match client.call(method, params)? {
        Some(RpcResponse::Result { result, .. }) => {
            if is_login {
                adopt_session(client, &result);
            }

            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Some(RpcResponse::Fault { code, string, .. }) => {
            println!("Fault {}: {}", code, string);
        }
        None => {
            println!("No reply from the exec within the timeout");
        }
    }

    Ok(())
}

/// Keep the token from a successful login for the requests that follow.
fn adopt_session(client: &mut Client, result: &Value) {
    if let Some(token) = result["token"].as_str() {
        client.token = Some(token.to_string());
    }

    if let Some(role) = result["role"].as_str() {
        println!("Logged in with the {} role", role);
    }
}
