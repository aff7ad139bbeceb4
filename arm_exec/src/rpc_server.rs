//! # RPC server
//!
//! JSON requests arrive on a REP socket, one frame per request. Each
//! method is looked up in a table carrying its minimum role, the caller's
//! token is resolved to a session, and the handler runs one controller
//! operation under the shared mutex.
//!
//! Dispatch is split from the socket so the whole surface can be tested
//! by feeding request strings straight into [`RpcDispatch`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};

// Internal
use crate::auth::{AuthError, AuthService, LoginSession};
use crate::params::ArmExecParams;
use crate::report::{self, ReportError};
use crate::robot::{RobotController, RobotError};
use crate::serial::SerialLink;
use crate::task_mgr::{self, TaskError, TaskManager};
use comms_if::arm::UserRole;
use comms_if::net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions};
use comms_if::rpc::{
    AddUserParams, ConnectParams, LoginParams, LoginResult, ModeParams, MoveParams,
    ReportFilterParams, RpcRequest, RpcResponse, SwitchParams, TaskRunParams, FAULT_AUTH,
    FAULT_BAD_PARAMS, FAULT_DEVICE, FAULT_FORBIDDEN, FAULT_INTERNAL, FAULT_LINK, FAULT_PARSE,
    FAULT_STATE, FAULT_TASK, FAULT_UNKNOWN_METHOD, FAULT_VALIDATION,
};
use comms_if::tasks::Task;
use util::audit::{AuditLevel, AuditTrail};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive poll timeout on the REP socket in milliseconds.
const RECV_TIMEOUT_MS: i32 = 200;

/// Send timeout on the REP socket in milliseconds.
const SEND_TIMEOUT_MS: i32 = 10;

/// Every method the exec answers, with the minimum role needed to call
/// it (`None` is public) and whether calls are recorded as orders.
pub const METHODS: &[MethodInfo] = &[
    MethodInfo {
        name: "help",
        min_role: None,
        recorded: false,
        help: "List every method and who may call it",
    },
    MethodInfo {
        name: "user.login",
        min_role: None,
        recorded: false,
        help: "Open a session: {username, password, client?}",
    },
    MethodInfo {
        name: "user.logout",
        min_role: Some(UserRole::Operator),
        recorded: false,
        help: "Close the calling session",
    },
    MethodInfo {
        name: "user.list",
        min_role: Some(UserRole::Admin),
        recorded: false,
        help: "List the known users and live sessions",
    },
    MethodInfo {
        name: "user.add",
        min_role: Some(UserRole::Admin),
        recorded: true,
        help: "Add a user: {username, password, role}",
    },
    MethodInfo {
        name: "robot.connect",
        min_role: Some(UserRole::Operator),
        recorded: true,
        help: "Open the serial link: {device?, baud?}",
    },
    MethodInfo {
        name: "robot.disconnect",
        min_role: Some(UserRole::Operator),
        recorded: true,
        help: "Close the serial link",
    },
    MethodInfo {
        name: "robot.get_status",
        min_role: Some(UserRole::Operator),
        recorded: false,
        help: "Query the arm's status",
    },
    MethodInfo {
        name: "robot.move",
        min_role: Some(UserRole::Operator),
        recorded: true,
        help: "Move the effector: {x, y, z, speed?}",
    },
    MethodInfo {
        name: "robot.enable_motors",
        min_role: Some(UserRole::Operator),
        recorded: true,
        help: "Energise the stepper drivers",
    },
    MethodInfo {
        name: "robot.disable_motors",
        min_role: Some(UserRole::Operator),
        recorded: true,
        help: "De-energise the stepper drivers",
    },
    MethodInfo {
        name: "robot.set_effector",
        min_role: Some(UserRole::Operator),
        recorded: true,
        help: "Switch the end effector: {active}",
    },
    MethodInfo {
        name: "robot.set_coord_mode",
        min_role: Some(UserRole::Operator),
        recorded: true,
        help: "Absolute or relative coordinates: {absolute}",
    },
    MethodInfo {
        name: "robot.list_tasks",
        min_role: Some(UserRole::Operator),
        recorded: false,
        help: "List the stored tasks",
    },
    MethodInfo {
        name: "robot.execute_task",
        min_role: Some(UserRole::Operator),
        recorded: true,
        help: "Replay a stored task: {id}",
    },
    MethodInfo {
        name: "robot.add_task",
        min_role: Some(UserRole::Operator),
        recorded: true,
        help: "Store a new task: {id, name, description?, gcode}",
    },
    MethodInfo {
        name: "robot.get_report",
        min_role: Some(UserRole::Operator),
        recorded: false,
        help: "Orders issued by the calling user",
    },
    MethodInfo {
        name: "robot.get_admin_report",
        min_role: Some(UserRole::Admin),
        recorded: false,
        help: "All orders: {filter_key?, filter_value?}",
    },
    MethodInfo {
        name: "robot.get_log_report",
        min_role: Some(UserRole::Admin),
        recorded: false,
        help: "Audit rows: {filter_key?, filter_value?}",
    },
];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One row of the method table.
#[derive(Debug, Clone, Copy)]
pub struct MethodInfo {
    pub name: &'static str,

    /// Minimum role needed to call the method, `None` is public
    pub min_role: Option<UserRole>,

    /// Whether calls land in the controller's order history
    pub recorded: bool,

    pub help: &'static str,
}

/// A protocol-level fault before it is stamped with a request id.
struct Fault {
    code: i32,
    string: String,
}

/// Socket-free request handling: parsing, auth, dispatch and recording.
pub struct RpcDispatch<L: SerialLink> {
    controller: Arc<Mutex<RobotController<L>>>,
    auth: AuthService,
    tasks: TaskManager,
    audit: AuditTrail,
    params: ArmExecParams,
}

/// The REP socket loop around an [`RpcDispatch`].
pub struct RpcServer<L: SerialLink> {
    socket: MonitoredSocket,
    dispatch: RpcDispatch<L>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl From<RobotError> for Fault {
    fn from(e: RobotError) -> Self {
        let code = match &e {
            RobotError::Link(_) => FAULT_LINK,
            RobotError::Device(_) => FAULT_DEVICE,
            RobotError::Unreachable(_, _, _) => FAULT_VALIDATION,
            _ => FAULT_STATE,
        };

        Fault {
            code,
            string: e.to_string(),
        }
    }
}

impl From<AuthError> for Fault {
    fn from(e: AuthError) -> Self {
        let code = match &e {
            AuthError::BadCredentials | AuthError::UnknownToken => FAULT_AUTH,
            AuthError::DuplicateUser => FAULT_VALIDATION,
            _ => FAULT_INTERNAL,
        };

        Fault {
            code,
            string: e.to_string(),
        }
    }
}

impl From<TaskError> for Fault {
    fn from(e: TaskError) -> Self {
        let code = match &e {
            TaskError::UnknownTask(_) | TaskError::ReplayFailed(_, _, _) => FAULT_TASK,
            TaskError::DuplicateTask(_) => FAULT_VALIDATION,
            _ => FAULT_INTERNAL,
        };

        Fault {
            code,
            string: e.to_string(),
        }
    }
}

impl From<ReportError> for Fault {
    fn from(e: ReportError) -> Self {
        let code = match &e {
            ReportError::AuditReadError(_) => FAULT_INTERNAL,
            _ => FAULT_BAD_PARAMS,
        };

        Fault {
            code,
            string: e.to_string(),
        }
    }
}

impl<L: SerialLink> RpcDispatch<L> {
    pub fn new(
        controller: Arc<Mutex<RobotController<L>>>,
        auth: AuthService,
        tasks: TaskManager,
        audit: AuditTrail,
        params: ArmExecParams,
    ) -> Self {
        Self {
            controller,
            auth,
            tasks,
            audit,
            params,
        }
    }

    /// Handle one raw request frame.
    ///
    /// Unparseable frames get a fault with id 0 since the real id never
    /// made it off the wire.
    pub fn handle_request_str(&mut self, raw: &str) -> RpcResponse {
        let request = match RpcRequest::from_json(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("Unparseable request: {}", e);
                return RpcResponse::fault(
                    0,
                    FAULT_PARSE,
                    &format!("Could not parse the request: {}", e),
                );
            }
        };

        self.handle_request(&request)
    }

    /// Handle one parsed request.
    pub fn handle_request(&mut self, request: &RpcRequest) -> RpcResponse {
        let info = match METHODS.iter().find(|m| m.name == request.method) {
            Some(info) => info,
            None => {
                return RpcResponse::fault(
                    request.id,
                    FAULT_UNKNOWN_METHOD,
                    &format!("No method named {:?}", request.method),
                )
            }
        };

        let session = match self.authorise(info, request) {
            Ok(session) => session,
            Err(fault) => return RpcResponse::fault(request.id, fault.code, &fault.string),
        };

        match &session {
            Some(session) => debug!("{} call from {}", info.name, session.username),
            None => debug!("{} call", info.name),
        }

        let outcome = self.dispatch(info.name, request, session.as_ref());

        // Orders and the audit trail capture what authenticated users did,
        // successes and failures alike
        if let Some(session) = &session {
            match &outcome {
                Ok((_, details)) => {
                    if info.recorded {
                        self.record_order(&session.username, info.name, details, true);
                    }
                }
                Err(fault) => {
                    if info.recorded {
                        self.record_order(&session.username, info.name, &fault.string, false);
                    } else {
                        self.record_audit(
                            AuditLevel::Error,
                            &session.username,
                            &format!("{}: {}", info.name, fault.string),
                        );
                    }
                }
            }
        }

        match outcome {
            Ok((value, _)) => RpcResponse::result(request.id, value),
            Err(fault) => {
                warn!("{} failed: {}", info.name, fault.string);
                RpcResponse::fault(request.id, fault.code, &fault.string)
            }
        }
    }

    /// Resolve the caller's session for a gated method.
    fn authorise(
        &self,
        info: &MethodInfo,
        request: &RpcRequest,
    ) -> Result<Option<LoginSession>, Fault> {
        let min_role = match info.min_role {
            Some(role) => role,
            None => return Ok(None),
        };

        let token = request.token.as_deref().ok_or_else(|| Fault {
            code: FAULT_AUTH,
            string: "No session token provided".to_string(),
        })?;

        let session = self.auth.session(token).ok_or_else(|| Fault {
            code: FAULT_AUTH,
            string: "Unknown or expired session token".to_string(),
        })?;

        if !role_allows(min_role, session.role) {
            return Err(Fault {
                code: FAULT_FORBIDDEN,
                string: format!("{} requires the {} role", info.name, min_role),
            });
        }

        Ok(Some(session.clone()))
    }

    /// Run the handler for a method the table knows.
    ///
    /// Handlers return the result value plus a details string for the
    /// order history.
    fn dispatch(
        &mut self,
        method: &str,
        request: &RpcRequest,
        session: Option<&LoginSession>,
    ) -> HandlerResult {
        match method {
            "help" => self.help(),
            "user.login" => self.user_login(request),
            "user.logout" => self.user_logout(request),
            "user.list" => self.user_list(),
            "user.add" => self.user_add(request),
            "robot.connect" => self.robot_connect(request),
            "robot.disconnect" => self.robot_disconnect(),
            "robot.get_status" => self.robot_get_status(),
            "robot.move" => self.robot_move(request),
            "robot.enable_motors" => self.robot_enable_motors(),
            "robot.disable_motors" => self.robot_disable_motors(),
            "robot.set_effector" => self.robot_set_effector(request),
            "robot.set_coord_mode" => self.robot_set_coord_mode(request),
            "robot.list_tasks" => self.robot_list_tasks(),
            "robot.execute_task" => self.robot_execute_task(request),
            "robot.add_task" => self.robot_add_task(request),
            "robot.get_report" => self.robot_get_report(session),
            "robot.get_admin_report" => self.robot_get_admin_report(request),
            "robot.get_log_report" => self.robot_get_log_report(request),
            other => Err(Fault {
                code: FAULT_INTERNAL,
                string: format!("The method table and dispatch disagree on {:?}", other),
            }),
        }
    }

    fn help(&self) -> HandlerResult {
        let methods: Vec<Value> = METHODS
            .iter()
            .map(|m| {
                json!({
                    "method": m.name,
                    "role": m.min_role.map(|r| r.as_str()),
                    "help": m.help,
                })
            })
            .collect();

        Ok((Value::Array(methods), String::new()))
    }

    fn user_login(&mut self, request: &RpcRequest) -> HandlerResult {
        let params: LoginParams = parse_params(&request.params)?;
        let peer = params.client.as_deref().unwrap_or("unknown");

        match self.auth.login(&params.username, &params.password, peer) {
            Ok((token, role)) => {
                self.record_audit(
                    AuditLevel::Info,
                    &params.username,
                    &format!("user.login from {}", peer),
                );

                Ok((to_value(&LoginResult { token, role })?, String::new()))
            }
            Err(e) => {
                self.record_audit(AuditLevel::Error, &params.username, "user.login failed");
                Err(Fault::from(e))
            }
        }
    }

    fn user_logout(&mut self, request: &RpcRequest) -> HandlerResult {
        // Authorisation already proved the token maps to a session
        let token = request.token.as_deref().unwrap_or_default();
        self.auth.logout(token)?;

        Ok((json!({ "logged_out": true }), String::new()))
    }

    fn user_list(&self) -> HandlerResult {
        let users: Vec<Value> = self
            .auth
            .list_users()
            .iter()
            .map(|(username, role)| {
                json!({
                    "username": username,
                    "role": role.as_str(),
                })
            })
            .collect();

        let sessions: Vec<Value> = self
            .auth
            .active_sessions()
            .iter()
            .map(|s| {
                json!({
                    "username": s.username,
                    "role": s.role.as_str(),
                    "client": s.peer,
                })
            })
            .collect();

        Ok((
            json!({ "users": users, "sessions": sessions }),
            String::new(),
        ))
    }

    fn user_add(&mut self, request: &RpcRequest) -> HandlerResult {
        let params: AddUserParams = parse_params(&request.params)?;

        self.auth
            .add_user(&params.username, &params.password, params.role)?;

        Ok((
            json!({ "added": params.username }),
            format!("added user {} as {}", params.username, params.role),
        ))
    }

    fn robot_connect(&mut self, request: &RpcRequest) -> HandlerResult {
        let params: ConnectParams = parse_params_opt(&request.params)?;

        let device = params
            .device
            .unwrap_or_else(|| self.params.serial_device.clone());
        let baud = params.baud.unwrap_or(self.params.serial_baud);

        let mut controller = self.lock_controller()?;
        controller.connect(&device, baud)?;

        Ok((
            to_value(&controller.status_report())?,
            format!("{} at {} baud", device, baud),
        ))
    }

    fn robot_disconnect(&mut self) -> HandlerResult {
        let mut controller = self.lock_controller()?;
        controller.disconnect()?;

        Ok((
            to_value(&controller.status_report())?,
            "link closed".to_string(),
        ))
    }

    fn robot_get_status(&mut self) -> HandlerResult {
        let mut controller = self.lock_controller()?;
        let report = controller.query_status()?;

        Ok((to_value(&report)?, String::new()))
    }

    fn robot_move(&mut self, request: &RpcRequest) -> HandlerResult {
        let params: MoveParams = parse_params(&request.params)?;

        let mut controller = self.lock_controller()?;
        controller.move_to(params.x, params.y, params.z, params.speed)?;

        Ok((
            to_value(&controller.status_report())?,
            format!("to ({:.3}, {:.3}, {:.3})", params.x, params.y, params.z),
        ))
    }

    fn robot_enable_motors(&mut self) -> HandlerResult {
        let mut controller = self.lock_controller()?;
        controller.enable_motors()?;

        Ok((
            to_value(&controller.status_report())?,
            "motors enabled".to_string(),
        ))
    }

    fn robot_disable_motors(&mut self) -> HandlerResult {
        let mut controller = self.lock_controller()?;
        controller.disable_motors()?;

        Ok((
            to_value(&controller.status_report())?,
            "motors disabled".to_string(),
        ))
    }

    fn robot_set_effector(&mut self, request: &RpcRequest) -> HandlerResult {
        let params: SwitchParams = parse_params(&request.params)?;

        let mut controller = self.lock_controller()?;
        controller.set_effector(params.active)?;

        let details = if params.active {
            "effector on"
        } else {
            "effector off"
        };

        Ok((to_value(&controller.status_report())?, details.to_string()))
    }

    fn robot_set_coord_mode(&mut self, request: &RpcRequest) -> HandlerResult {
        let params: ModeParams = parse_params(&request.params)?;

        let mut controller = self.lock_controller()?;
        controller.set_coordinate_mode(params.absolute)?;

        let details = if params.absolute {
            "absolute mode"
        } else {
            "relative mode"
        };

        Ok((to_value(&controller.status_report())?, details.to_string()))
    }

    fn robot_list_tasks(&self) -> HandlerResult {
        Ok((to_value(&self.tasks.list())?, String::new()))
    }

    fn robot_execute_task(&mut self, request: &RpcRequest) -> HandlerResult {
        let params: TaskRunParams = parse_params(&request.params)?;

        let task = self.tasks.get(&params.id)?.clone();

        let mut controller = self.lock_controller()?;
        task_mgr::run_task(&mut controller, &task)?;

        Ok((
            json!({ "task": task.id, "lines": task.gcode.len() }),
            format!("task {} ({} lines)", task.id, task.gcode.len()),
        ))
    }

    fn robot_add_task(&mut self, request: &RpcRequest) -> HandlerResult {
        let task: Task = parse_params(&request.params)?;

        if task.gcode.is_empty() {
            return Err(Fault {
                code: FAULT_VALIDATION,
                string: "A task needs at least one G-code line".to_string(),
            });
        }

        let details = format!("task {} ({} lines)", task.id, task.gcode.len());
        self.tasks.add(task)?;

        Ok((json!({ "added": true }), details))
    }

    fn robot_get_report(&self, session: Option<&LoginSession>) -> HandlerResult {
        let session = session.ok_or_else(|| Fault {
            code: FAULT_INTERNAL,
            string: "No identity for a gated method".to_string(),
        })?;

        let controller = self.lock_controller()?;
        let report = report::operator_report(&session.username, controller.orders());

        Ok((to_value(&report)?, String::new()))
    }

    fn robot_get_admin_report(&self, request: &RpcRequest) -> HandlerResult {
        let params: ReportFilterParams = parse_params_opt(&request.params)?;

        let controller = self.lock_controller()?;
        let report = report::admin_report(controller.orders(), filter_pair(&params))?;

        Ok((to_value(&report)?, String::new()))
    }

    fn robot_get_log_report(&self, request: &RpcRequest) -> HandlerResult {
        let params: ReportFilterParams = parse_params_opt(&request.params)?;

        let report = report::log_report(self.audit.path(), filter_pair(&params))?;

        Ok((to_value(&report)?, String::new()))
    }

    /// Append to the order history and the audit trail.
    fn record_order(&mut self, username: &str, method: &str, details: &str, success: bool) {
        if let Ok(mut controller) = self.controller.lock() {
            controller.record_order(username, method, details.to_string(), success);
        }

        let level = if success {
            AuditLevel::Info
        } else {
            AuditLevel::Error
        };

        self.record_audit(level, username, &format!("{}: {}", method, details));
    }

    /// Append one audit row, the trail never blocks request handling.
    fn record_audit(&mut self, level: AuditLevel, user: &str, message: &str) {
        if let Err(e) = self.audit.record(level, user, message) {
            warn!("Could not write the audit row: {}", e);
        }
    }

    fn lock_controller(&self) -> Result<MutexGuard<RobotController<L>>, Fault> {
        self.controller.lock().map_err(|_| Fault {
            code: FAULT_INTERNAL,
            string: "The controller mutex is poisoned".to_string(),
        })
    }
}

impl<L: SerialLink> RpcServer<L> {
    /// Bind the REP socket and wrap the dispatcher.
    pub fn new(
        ctx: &zmq::Context,
        endpoint: &str,
        dispatch: RpcDispatch<L>,
    ) -> Result<Self, MonitoredSocketError> {
        let socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            recv_timeout: RECV_TIMEOUT_MS,
            send_timeout: SEND_TIMEOUT_MS,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::REP, socket_options, endpoint)?;

        info!("RPC server listening on {}", endpoint);

        Ok(Self { socket, dispatch })
    }

    /// Serve one request if one is waiting.
    ///
    /// Returns whether a request was handled. The REP socket discards
    /// replies to peers that have gone away, so send failures are logged
    /// rather than raised.
    pub fn step(&mut self) -> Result<bool, MonitoredSocketError> {
        let raw = match self.socket.recv_str()? {
            Some(raw) => raw,
            None => return Ok(false),
        };

        let response = self.dispatch.handle_request_str(&raw);

        let json = match response.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not serialise a response: {}", e);
                String::new()
            }
        };

        if let Err(e) = self.socket.send_str(&json) {
            warn!("Could not send a response: {}", e);
        }

        Ok(true)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// A handler's result value plus the details string recorded against the
/// order.
type HandlerResult = Result<(Value, String), Fault>;

/// Whether a session role satisfies a method's minimum role.
fn role_allows(min_role: UserRole, actual: UserRole) -> bool {
    match min_role {
        UserRole::Operator => true,
        UserRole::Admin => actual == UserRole::Admin,
    }
}

fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, Fault> {
    serde_json::from_value(params.clone()).map_err(|e| Fault {
        code: FAULT_BAD_PARAMS,
        string: format!("Bad parameters: {}", e),
    })
}

/// Like [`parse_params`] but absent parameters mean the defaults.
fn parse_params_opt<T: DeserializeOwned + Default>(params: &Value) -> Result<T, Fault> {
    if params.is_null() {
        return Ok(T::default());
    }

    parse_params(params)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, Fault> {
    serde_json::to_value(value).map_err(|e| Fault {
        code: FAULT_INTERNAL,
        string: format!("Could not serialise the result: {}", e),
    })
}

fn filter_pair(params: &ReportFilterParams) -> Option<(&str, &str)> {
    match (&params.filter_key, &params.filter_value) {
        (Some(key), Some(value)) => Some((key.as_str(), value.as_str())),
        _ => None,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
