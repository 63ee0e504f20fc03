use std::collections::VecDeque;
use std::fs::File;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::catalog::{ImageCatalog, NullCatalog};
use crate::consts::{
    CLIENT_VERSION, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, MAX_DATAGRAM_SIZE, MSG_CHALLENGE,
    MSG_INFO_TEXT, MSG_LOGON, READ_TIMEOUT_SECONDS, SERVER_ID_PREFACE_SIZE, UDP_CONFIRM_SIZE,
    UDP_ID_PREFIX, UPGRADE_URL,
};
use crate::crypto::{answer_challenge, obfuscate, PasswordHash};
use crate::error::{DecodeError, Error, LoginError, Result};
use crate::framing::{encode_frame, split_datagram, tag_of, write_frame, FrameError, FrameReader};
use crate::movie::MovieRecorder;
use crate::notify::{Notification, NotificationFilter};
use crate::packet::{
    decode_live, Challenge, Frame, Identifiers, InputPacket, LoginRequest, LoginResult,
    LogonResponse, INPUT_FLAG_MOUSE_DOWN,
};
use crate::pipeline::{input_delay, FrameClock, LatencyEma, Presentation};
use crate::snapshot::WorldSnapshot;
use crate::socket::{self, GameSocket};
use crate::store::Settings;
use crate::task::{spawn_guarded, CancelToken, PanicLog};
use crate::time;
use crate::transceiver::Transceiver;
use crate::world::World;

pub const DISCONNECTED_MESSAGE: &str = "Disconnected from server";

type Callback<Ctx> = Box<dyn FnMut(SessionState, SessionState, &mut Ctx) + Send + Sync + 'static>;

/// What the session logs in with: the plaintext password, or only its MD5
/// when the user asked for the password to be remembered.
#[derive(Clone, Default)]
pub struct Credentials {
    password: Option<String>,
    hash: Option<PasswordHash>,
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            hash: None,
        }
    }

    pub fn hash(hash: PasswordHash) -> Self {
        Self {
            password: None,
            hash: Some(hash),
        }
    }

    /// The key challenges are answered with.
    pub fn key(&self) -> Option<PasswordHash> {
        self.password
            .as_deref()
            .map(PasswordHash::of)
            .or(self.hash)
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.key().is_none()
    }

    /// Drops the plaintext password, keeping its hash only if asked to.
    pub fn forget(&mut self, keep_hash: bool) {
        let hash = self.key();
        self.password = None;
        self.hash = if keep_hash { hash } else { None };
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| ".."))
            .field("hash", &self.hash.is_some())
            .finish()
    }
}

/// Configuration for a session
///
/// * `server` - Host and port of the game server (TCP and UDP share the port).
/// * `character` / `credentials` - Who to log in as.
/// * `remember_password_hash` - Keep the password's MD5 after disconnecting.
/// * `read_timeout` - How long socket reads wait before checking for cancellation.
/// * `on_state_change` - A callback that will be called when the session changes states.
///
/// # Example
/// ```no_run
/// use clanlord::{Credentials, Session, SessionConfig, SessionState};
///
/// let cfg = SessionConfig::with_context(Vec::new())
///     .server("127.0.0.1", 5010)
///     .character("Hero")
///     .credentials(Credentials::password("hunter2"))
///     .on_state_change(|from, to, seen: &mut Vec<SessionState>| {
///         seen.push(to);
///         if let (SessionState::LoggedIn, SessionState::Running) = (from, to) {
///             println!("session running");
///         }
///     });
/// let mut session = Session::new(cfg).unwrap();
/// session.connect().unwrap();
/// ```
pub struct SessionConfig<Ctx> {
    host: String,
    port: u16,
    character: String,
    credentials: Credentials,
    remember_password_hash: bool,
    client_version: u32,
    identifiers: Identifiers,
    read_timeout: Duration,
    presentation: Presentation,
    notifications: NotificationFilter,
    catalog: Arc<dyn ImageCatalog>,
    panic_log: Option<PathBuf>,
    context: Ctx,
    on_state_change: Option<Callback<Ctx>>,
}

impl Default for SessionConfig<()> {
    fn default() -> Self {
        Self::with_context(())
    }
}

impl<Ctx> SessionConfig<Ctx> {
    /// Create a new, default session configuration with no context.
    pub fn new() -> SessionConfig<()> {
        SessionConfig::<()>::default()
    }
    /// Create a new session configuration with context that will be passed to the callbacks.
    pub fn with_context(ctx: Ctx) -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            character: String::new(),
            credentials: Credentials::default(),
            remember_password_hash: false,
            client_version: CLIENT_VERSION,
            identifiers: Identifiers::default(),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECONDS),
            presentation: Presentation::default(),
            notifications: NotificationFilter::default(),
            catalog: Arc::new(NullCatalog),
            panic_log: None,
            context: ctx,
            on_state_change: None,
        }
    }
    pub fn server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }
    pub fn character(mut self, name: impl Into<String>) -> Self {
        self.character = name.into();
        self
    }
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
    /// Keep the password's MD5 after a disconnect so the session can log in
    /// again without asking. The default is to forget everything.
    pub fn remember_password_hash(mut self, remember: bool) -> Self {
        self.remember_password_hash = remember;
        self
    }
    /// Versions announced to the server. The client version is lowered to
    /// the server's if the server is older.
    pub fn versions(mut self, client: u32, images: u32, sounds: u32) -> Self {
        self.client_version = client;
        self.identifiers.images_version = images;
        self.identifiers.sounds_version = sounds;
        self
    }
    /// The identification block sent with the client's versions.
    pub fn identification(
        mut self,
        username: impl Into<String>,
        hostname: impl Into<String>,
        boot_path: impl Into<String>,
    ) -> Self {
        self.identifiers.username = username.into();
        self.identifiers.hostname = hostname.into();
        self.identifiers.boot_path = boot_path.into();
        self
    }
    pub fn language(mut self, language: u8) -> Self {
        self.identifiers.language = language;
        self
    }
    /// Set how long socket reads wait before checking for cancellation.
    /// The default is 1 second.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
    pub fn presentation(mut self, presentation: Presentation) -> Self {
        self.presentation = presentation;
        self
    }
    pub fn notifications(mut self, filter: NotificationFilter) -> Self {
        self.notifications = filter;
        self
    }
    pub fn catalog(mut self, catalog: Arc<dyn ImageCatalog>) -> Self {
        self.catalog = catalog;
        self
    }
    /// File that panics caught in session tasks are appended to.
    pub fn panic_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.panic_log = Some(path.into());
        self
    }
    /// Applies the persisted settings: server, presentation, notification
    /// classes, password remembering, last character and panic log.
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.host = settings.server_host.clone();
        self.port = settings.server_port;
        self.presentation = settings.presentation();
        self.notifications = settings.notifications;
        self.remember_password_hash = settings.remember_password_hash;
        if let Some(name) = &settings.last_character {
            self.character = name.clone();
        }
        self.panic_log = settings.panic_log.clone();
        self
    }
    /// Set a callback that will be called when the session changes states.
    pub fn on_state_change<F>(mut self, cb: F) -> Self
    where
        F: FnMut(SessionState, SessionState, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(cb));
        self
    }
}

/// The states in the session state machine.
///
/// The initial state is `Idle`. [`connect`](Session::connect) walks the
/// login states in order; `AwaitingChallenge` and `AnsweringChallenge`
/// alternate for as long as the server keeps sending challenges. Once the
/// server accepts the login the session is `LoggedIn`, starts its tasks and
/// becomes `Running`.
///
/// Any failure, or a call to [`disconnect`](Session::disconnect), closes
/// both sockets and passes through `Disconnected` back to `Idle`, from where
/// the session may connect again. [`reconnect`](Session::reconnect) passes
/// through `Reconnecting` on its way back into the login states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Both sockets are closed and the tasks have stopped.
    Disconnected,
    /// Not connected. Where a session starts and where it returns to.
    Idle,
    Resolving,
    TcpConnecting,
    /// Waiting for the server's id on the login stream.
    ReceivingServerId,
    /// The server id was echoed over UDP; waiting for the confirmation.
    UdpHandshake,
    SendingIdentifiers,
    AwaitingChallenge,
    AnsweringChallenge,
    LoggedIn,
    /// Draw states are flowing in and input is flowing out.
    Running,
    Reconnecting,
}

/// The single pending command plus the commands waiting behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandQueue {
    pending: Option<String>,
    queue: VecDeque<String>,
}

impl CommandQueue {
    /// Fills the pending slot, replacing whatever waited there.
    pub fn set(&mut self, command: String) {
        self.pending = Some(command);
    }

    pub fn push(&mut self, command: String) {
        self.queue.push_back(command);
    }

    /// The command for the next input packet: the slot first, then the
    /// queue in order.
    pub fn take(&mut self) -> Option<String> {
        self.pending.take().or_else(|| self.queue.pop_front())
    }

    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.pending.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Input-side state shared by the session and its tasks.
#[derive(Debug, Default)]
struct Link {
    mouse_h: i16,
    mouse_v: i16,
    mouse_down: bool,
    commands: CommandQueue,
    command_num: u32,
    latency: LatencyEma,
    clock: FrameClock,
    last_send: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskEvent {
    Failed { task: &'static str, reason: String },
}

/// A Clan Lord session.
///
/// The session logs in on the calling thread, then runs three tasks: a UDP
/// reader feeding draw states into the [`World`], a TCP reader for server
/// text, and an input sender that answers each frame. Callers poll
/// [`update`](Session::update) to notice failures, and read the world
/// through [`snapshot`](Session::snapshot).
///
/// # Example
/// ```no_run
/// use clanlord::{Credentials, Session, SessionConfig};
/// use std::time::{Duration, Instant};
///
/// let cfg = SessionConfig::default()
///     .character("Hero")
///     .credentials(Credentials::password("hunter2"));
/// let mut session = Session::new(cfg).unwrap();
/// session.connect().unwrap();
/// session.queue_command("/who");
/// while session.is_connected() {
///     session.update();
///     let snapshot = session.snapshot(Instant::now());
///     for line in session.take_console() {
///         println!("{line}");
///     }
///     # let _ = snapshot;
///     std::thread::sleep(Duration::from_millis(50));
/// }
/// ```
pub struct Session<T: Transceiver, Ctx = ()> {
    transceiver: Arc<T>,
    cfg: SessionConfig<Ctx>,
    state: SessionState,
    server: Option<SocketAddr>,
    tcp: Option<TcpStream>,
    client_version: u32,
    encrypted: bool,
    world: Arc<Mutex<World>>,
    link: Arc<Mutex<Link>>,
    cancel: CancelToken,
    panics: PanicLog,
    tasks: Vec<JoinHandle<()>>,
    events_tx: Sender<TaskEvent>,
    events_rx: Receiver<TaskEvent>,
    recorder: Arc<Mutex<Option<MovieRecorder<File>>>>,
    last_error: Option<String>,
}

impl<Ctx> Session<GameSocket, Ctx> {
    /// Create a session on an ephemeral UDP port.
    pub fn new(cfg: SessionConfig<Ctx>) -> Result<Self> {
        let socket = GameSocket::bind((Ipv4Addr::UNSPECIFIED, 0), cfg.read_timeout)?;
        let session = Session::with_transceiver(socket, cfg);
        log::info!("session started on {}", session.transceiver.addr());
        Ok(session)
    }
}

impl<T: Transceiver, Ctx> Session<T, Ctx> {
    pub fn with_transceiver(transceiver: T, cfg: SessionConfig<Ctx>) -> Self {
        let mut world = World::new(cfg.catalog.clone());
        world.set_notification_filter(cfg.notifications);
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            transceiver: Arc::new(transceiver),
            client_version: cfg.client_version,
            panics: PanicLog::new(cfg.panic_log.clone()),
            cfg,
            state: SessionState::Idle,
            server: None,
            tcp: None,
            encrypted: false,
            world: Arc::new(Mutex::new(world)),
            link: Arc::default(),
            cancel: CancelToken::new(),
            tasks: Vec::new(),
            events_tx,
            events_rx,
            recorder: Arc::default(),
            last_error: None,
        }
    }
    fn set_state(&mut self, state: SessionState) {
        log::debug!("session state changing from {:?} to {:?}", self.state, state);
        if let Some(ref mut cb) = self.cfg.on_state_change {
            cb(self.state, state, &mut self.cfg.context)
        }
        self.state = state;
    }
    /// Gets the local address of the UDP endpoint.
    pub fn addr(&self) -> SocketAddr {
        self.transceiver.addr()
    }
    /// The server address, once resolved.
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server
    }
    /// Gets the current state of the session.
    pub fn state(&self) -> SessionState {
        self.state
    }
    /// Returns true if the session ended because something failed.
    pub fn is_error(&self) -> bool {
        self.state == SessionState::Idle && self.last_error.is_some()
    }
    /// Returns true while logging in.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.state,
            SessionState::Resolving
                | SessionState::TcpConnecting
                | SessionState::ReceivingServerId
                | SessionState::UdpHandshake
                | SessionState::SendingIdentifiers
                | SessionState::AwaitingChallenge
                | SessionState::AnsweringChallenge
                | SessionState::LoggedIn
                | SessionState::Reconnecting
        )
    }
    /// Returns true while draw states are flowing.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Running)
    }
    /// Why the last session ended, if it failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
    /// The client version actually in use, after any downgrade.
    pub fn client_version(&self) -> u32 {
        self.client_version
    }
    /// Whether the server asked for draw states to be obfuscated.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }
    pub fn has_credentials(&self) -> bool {
        !self.cfg.credentials.is_empty()
    }
    /// Replaces the login credentials, e.g. after the password was forgotten
    /// on disconnect.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.cfg.credentials = credentials;
    }
    pub fn context(&self) -> &Ctx {
        &self.cfg.context
    }
    pub fn context_mut(&mut self) -> &mut Ctx {
        &mut self.cfg.context
    }
    pub fn panics(&self) -> &PanicLog {
        &self.panics
    }
    pub fn world(&self) -> Arc<Mutex<World>> {
        self.world.clone()
    }
    /// A deep copy of the world, interpolated for `now`.
    pub fn snapshot(&self, now: Instant) -> WorldSnapshot {
        self.world.lock().snapshot(now, &self.cfg.presentation)
    }
    pub fn take_notifications(&self) -> Vec<Notification> {
        self.world.lock().take_notifications()
    }
    pub fn take_console(&self) -> Vec<String> {
        self.world.lock().take_console()
    }
    /// Smoothed round-trip time of input packets.
    pub fn latency(&self) -> Duration {
        self.link.lock().latency.value()
    }
    /// The server's measured frame interval.
    pub fn frame_interval(&self) -> Duration {
        self.link.lock().clock.interval()
    }
    /// Latest mouse state, sent with the next input packet.
    pub fn set_input(&self, mouse_h: i16, mouse_v: i16, mouse_down: bool) {
        let mut link = self.link.lock();
        link.mouse_h = mouse_h;
        link.mouse_v = mouse_v;
        link.mouse_down = mouse_down;
    }
    /// Puts a command in the pending slot, replacing any command that has
    /// not been sent yet.
    pub fn set_command(&self, command: impl Into<String>) {
        self.link.lock().commands.set(command.into());
    }
    /// Queues a command behind the pending one.
    pub fn queue_command(&self, command: impl Into<String>) {
        self.link.lock().commands.push(command.into());
    }
    /// Records every draw state from now on, starting from the world as it
    /// stands. Replaces any recording in progress without finishing it.
    pub fn start_recording(&self, mut recorder: MovieRecorder<File>) {
        recorder.queue_world(&self.world.lock());
        *self.recorder.lock() = Some(recorder);
    }
    /// Starts recording to a new movie file at `path`, stamped with the
    /// current time.
    pub fn record_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.start_recording(MovieRecorder::new(file, time::mac_now())?);
        log::info!("recording movie to {}", path.as_ref().display());
        Ok(())
    }
    /// Finishes the recording in progress and returns its file.
    pub fn stop_recording(&self) -> Result<Option<File>> {
        let recorder = self.recorder.lock().take();
        match recorder {
            Some(recorder) => Ok(Some(recorder.finish()?)),
            None => Ok(None),
        }
    }
    fn identifiers(&self) -> Identifiers {
        Identifiers {
            client_version: self.client_version,
            ..self.cfg.identifiers.clone()
        }
    }
    fn write(&mut self, payload: &[u8]) -> Result<()> {
        let stream = self.tcp.as_mut().ok_or(FrameError::ConnectionClosed)?;
        write_frame(stream, payload)?;
        Ok(())
    }
    /// Stops the tasks and closes both sockets.
    fn teardown(&mut self) {
        self.cancel.cancel();
        if let Some(stream) = self.tcp.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for task in self.tasks.drain(..) {
            if task.join().is_err() {
                log::error!("session task could not be joined");
            }
        }
        while self.events_rx.try_recv().is_ok() {}
        self.encrypted = false;
    }
    fn close(&mut self, reason: Option<String>) {
        self.teardown();
        self.cfg
            .credentials
            .forget(self.cfg.remember_password_hash);
        {
            let mut world = self.world.lock();
            if let Some(reason) = &reason {
                world.push_console(reason.clone());
            }
            world.push_console(DISCONNECTED_MESSAGE);
        }
        self.last_error = reason;
        self.set_state(SessionState::Disconnected);
        self.set_state(SessionState::Idle);
    }
    /// Closes the session. The password is forgotten; its hash is kept only
    /// if the configuration asks for it.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        log::info!("disconnecting from server");
        self.close(None);
    }
    /// Checks on the session's tasks and disconnects if one has failed.
    pub fn update(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        if let Ok(TaskEvent::Failed { task, reason }) = self.events_rx.try_recv() {
            log::info!("session lost: {task} failed: {reason}");
            self.close(Some(reason));
        } else if self.cancel.is_cancelled() {
            let reason = self
                .panics
                .entries()
                .pop()
                .unwrap_or_else(|| "session cancelled".to_string());
            self.close(Some(reason));
        }
    }
}

impl<T, Ctx> Session<T, Ctx>
where
    T: Transceiver + Send + Sync + 'static,
{
    /// Logs in and starts the session's tasks. Blocks until the server
    /// accepts or rejects the login.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.cancel = CancelToken::new();
        self.last_error = None;
        let result = self.login().and_then(|reader| self.start_tasks(reader));
        if let Err(e) = &result {
            log::error!("session failed to connect: {e}");
            self.close(Some(e.to_string()));
        }
        result
    }
    /// Drops the current connection, if any, and logs in again with the
    /// same credentials.
    pub fn reconnect(&mut self) -> Result<()> {
        self.teardown();
        self.set_state(SessionState::Reconnecting);
        self.connect()
    }
    fn login(&mut self) -> Result<FrameReader<TcpStream>> {
        let key = self
            .cfg
            .credentials
            .key()
            .ok_or(LoginError::MissingCredentials)?;
        self.client_version = self.cfg.client_version;

        self.set_state(SessionState::Resolving);
        let addr = socket::resolve(&self.cfg.host, self.cfg.port)?
            .ok_or_else(|| Error::Unresolved(format!("{}:{}", self.cfg.host, self.cfg.port)))?;
        self.server = Some(addr);

        self.set_state(SessionState::TcpConnecting);
        log::info!("connecting to {addr}");
        let stream = socket::connect_tcp(addr, self.cfg.read_timeout)?;
        let mut reader = FrameReader::new(stream.try_clone()?);
        self.tcp = Some(stream);

        self.set_state(SessionState::ReceivingServerId);
        let preface = wait(&self.cancel, || reader.read_raw(SERVER_ID_PREFACE_SIZE))?;
        self.set_state(SessionState::UdpHandshake);
        let mut hello = UDP_ID_PREFIX.to_be_bytes().to_vec();
        hello.extend_from_slice(&preface[2..]);
        self.transceiver.send(&hello, addr).map_err(Into::<Error>::into)?;
        let confirm = wait(&self.cancel, || reader.read_raw(UDP_CONFIRM_SIZE))?;
        let code = i16::from_be_bytes([confirm[0], confirm[1]]);
        if code != 0 {
            return Err(login_failure(LoginResult::from_code(code)).into());
        }

        self.set_state(SessionState::SendingIdentifiers);
        let identifiers = self.identifiers().encode()?;
        self.write(&identifiers)?;

        self.set_state(SessionState::AwaitingChallenge);
        let mut early_text = Vec::new();
        loop {
            let payload = wait(&self.cancel, || reader.read_frame())?;
            match tag_of(&payload) {
                Some(MSG_CHALLENGE) => {
                    let challenge = Challenge::decode(&payload)?;
                    self.set_state(SessionState::AnsweringChallenge);
                    if challenge.server_version < self.client_version {
                        log::info!(
                            "server is at version {}, downgrading from {}",
                            challenge.server_version,
                            self.client_version
                        );
                        self.client_version = challenge.server_version;
                    }
                    let request = LoginRequest {
                        client_version: self.client_version,
                        images_version: self.cfg.identifiers.images_version,
                        sounds_version: self.cfg.identifiers.sounds_version,
                        name: self.cfg.character.clone(),
                        answer: answer_challenge(&challenge.challenge, &key)?,
                    };
                    self.write(&request.encode()?)?;
                    self.set_state(SessionState::AwaitingChallenge);
                }
                Some(MSG_LOGON) => {
                    let response = LogonResponse::decode(&payload)?;
                    if !response.result.is_ok() {
                        return Err(login_failure(response.result).into());
                    }
                    self.encrypted = response.encrypted;
                    break;
                }
                Some(MSG_INFO_TEXT) => early_text.push(decode_live(&payload, false)?),
                Some(tag) => return Err(LoginError::UnexpectedMessage(tag).into()),
                None => return Err(DecodeError::Truncated("tag").into()),
            }
        }

        self.set_state(SessionState::LoggedIn);
        log::info!("logged in as {}", self.cfg.character);
        let mut world = self.world.lock();
        world.begin();
        for frame in &early_text {
            world.apply_frame(frame, Instant::now())?;
        }
        drop(world);
        Ok(reader)
    }
    fn start_tasks(&mut self, reader: FrameReader<TcpStream>) -> Result<()> {
        let server = self.server.ok_or(FrameError::ConnectionClosed)?;
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
        *self.link.lock() = Link::default();
        let rt = Runtime {
            udp: self.transceiver.clone(),
            server,
            world: self.world.clone(),
            link: self.link.clone(),
            cancel: self.cancel.clone(),
            events: self.events_tx.clone(),
            encrypted: self.encrypted,
            recorder: self.recorder.clone(),
            read_timeout: self.cfg.read_timeout,
        };
        let udp = rt.clone();
        self.tasks.push(spawn_guarded(
            "udp-reader",
            self.cancel.clone(),
            self.panics.clone(),
            move || udp.udp_reader(frame_tx),
        )?);
        let tcp = rt.clone();
        self.tasks.push(spawn_guarded(
            "tcp-reader",
            self.cancel.clone(),
            self.panics.clone(),
            move || tcp.tcp_reader(reader),
        )?);
        self.tasks.push(spawn_guarded(
            "input-sender",
            self.cancel.clone(),
            self.panics.clone(),
            move || rt.input_sender(frame_rx),
        )?);
        self.set_state(SessionState::Running);
        Ok(())
    }
}

impl<T: Transceiver, Ctx> Drop for Session<T, Ctx> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(stream) = &self.tcp {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn login_failure(result: LoginResult) -> LoginError {
    if result.is_obsolete() {
        LoginError::Obsolete {
            code: result.code(),
            url: UPGRADE_URL,
        }
    } else {
        LoginError::Rejected(result)
    }
}

/// Retries a read that may time out until it yields or the session is
/// cancelled.
fn wait<V>(
    cancel: &CancelToken,
    mut read: impl FnMut() -> std::result::Result<Option<V>, FrameError>,
) -> Result<V> {
    loop {
        if cancel.is_cancelled() {
            return Err(LoginError::Cancelled.into());
        }
        if let Some(value) = read()? {
            return Ok(value);
        }
    }
}

/// Everything a session task needs, cloned into each task.
struct Runtime<T> {
    udp: Arc<T>,
    server: SocketAddr,
    world: Arc<Mutex<World>>,
    link: Arc<Mutex<Link>>,
    cancel: CancelToken,
    events: Sender<TaskEvent>,
    encrypted: bool,
    recorder: Arc<Mutex<Option<MovieRecorder<File>>>>,
    read_timeout: Duration,
}

impl<T> Clone for Runtime<T> {
    fn clone(&self) -> Self {
        Self {
            udp: self.udp.clone(),
            server: self.server,
            world: self.world.clone(),
            link: self.link.clone(),
            cancel: self.cancel.clone(),
            events: self.events.clone(),
            encrypted: self.encrypted,
            recorder: self.recorder.clone(),
            read_timeout: self.read_timeout,
        }
    }
}

impl<T: Transceiver> Runtime<T> {
    fn fail(&self, task: &'static str, err: Error) {
        if self.cancel.is_cancelled() {
            return;
        }
        log::error!("{task} failed: {err}");
        let _ = self.events.send(TaskEvent::Failed {
            task,
            reason: err.to_string(),
        });
        self.cancel.cancel();
    }

    fn udp_reader(self, frames: Sender<()>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while !self.cancel.is_cancelled() {
            let (len, from) = match self.udp.recv(&mut buf) {
                Ok(Some(received)) => received,
                Ok(None) => continue,
                Err(e) => return self.fail("udp reader", e.into()),
            };
            if from != self.server {
                log::trace!("ignoring datagram from {from}");
                continue;
            }
            self.receive_datagram(&buf[..len], Instant::now(), &frames);
        }
    }

    fn receive_datagram(&self, datagram: &[u8], now: Instant, frames: &Sender<()>) {
        {
            let mut link = self.link.lock();
            if let Some(sent) = link.last_send.take() {
                let net = link.latency.update(now.saturating_duration_since(sent));
                log::trace!("latency {net:?}");
            }
        }
        let payloads = match split_datagram(datagram) {
            Ok(payloads) => payloads,
            Err(e) => {
                log::debug!("dropping datagram: {e}");
                return;
            }
        };
        let mut drew = false;
        for payload in payloads {
            let frame = match decode_live(payload, self.encrypted) {
                Ok(frame) => frame,
                Err(e) => {
                    log::debug!("dropping udp frame: {e}");
                    continue;
                }
            };
            if let Frame::DrawState(_) = frame {
                drew = true;
                self.record(payload);
            }
            if let Err(e) = self.world.lock().apply_frame(&frame, now) {
                log::warn!("{} frame rejected: {e}", frame.name());
            }
        }
        if drew {
            self.link.lock().clock.record(now);
            if let Err(TrySendError::Disconnected(())) = frames.try_send(()) {
                log::trace!("input sender has stopped");
            }
        }
    }

    fn record(&self, payload: &[u8]) {
        let mut slot = self.recorder.lock();
        let Some(recorder) = slot.as_mut() else {
            return;
        };
        let mut body = payload[2..].to_vec();
        if self.encrypted {
            obfuscate(&mut body);
        }
        if let Err(e) = recorder.record(&body) {
            log::error!("movie recording stopped: {e}");
            *slot = None;
        }
    }

    fn tcp_reader(self, mut reader: FrameReader<TcpStream>) {
        while !self.cancel.is_cancelled() {
            let payload = match reader.read_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => return self.fail("tcp reader", e.into()),
            };
            match decode_live(&payload, false) {
                Ok(frame) => {
                    if let Err(e) = self.world.lock().apply_frame(&frame, Instant::now()) {
                        log::warn!("{} frame rejected: {e}", frame.name());
                    }
                }
                Err(e) => log::debug!("dropping tcp frame: {e}"),
            }
        }
    }

    fn input_sender(self, frames: Receiver<()>) {
        while !self.cancel.is_cancelled() {
            match frames.recv_timeout(self.read_timeout) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
            let delay = {
                let link = self.link.lock();
                input_delay(link.clock.interval(), link.latency.value())
            };
            thread::sleep(delay);
            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.send_input(Instant::now()) {
                return self.fail("input sender", e);
            }
        }
    }

    fn send_input(&self, now: Instant) -> Result<()> {
        let (ack_frame, resend_frame) = {
            let world = self.world.lock();
            (world.ack_frame(), world.resend_frame())
        };
        let packet = {
            let mut link = self.link.lock();
            if link.clock.is_stalled(now) {
                log::trace!("no frame for a while, holding input");
                return Ok(());
            }
            link.command_num = link.command_num.wrapping_add(1);
            let packet = InputPacket {
                mouse_h: link.mouse_h,
                mouse_v: link.mouse_v,
                flags: if link.mouse_down {
                    INPUT_FLAG_MOUSE_DOWN
                } else {
                    0
                },
                ack_frame,
                resend_frame,
                command_num: link.command_num,
                command: link.commands.take().unwrap_or_default(),
            };
            link.last_send = Some(now);
            packet
        };
        if !packet.command.is_empty() {
            log::debug!("sending command {}: {}", packet.command_num, packet.command);
        }
        let datagram = encode_frame(&packet.encode()?)?;
        self.udp.send(&datagram, self.server).map_err(Into::<Error>::into)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::{DescriptorRecord, DrawState, MobileKind, MobileRecord};
    use crate::packet::encode_draw_state;
    use crate::simulator::{FakeServer, Script};
    use crate::transceiver::memory::{self, MemoryTransceiver};

    fn runtime(udp: MemoryTransceiver, server: SocketAddr) -> Runtime<MemoryTransceiver> {
        let mut world = World::default();
        world.begin();
        let (events, _) = crossbeam_channel::unbounded();
        Runtime {
            server,
            udp: Arc::new(udp),
            world: Arc::new(Mutex::new(world)),
            link: Arc::default(),
            cancel: CancelToken::new(),
            events,
            encrypted: true,
            recorder: Arc::default(),
            read_timeout: Duration::from_millis(20),
        }
    }

    fn draw_state(ack: u32) -> DrawState {
        DrawState {
            ack_frame: ack,
            resend_frame: ack - 1,
            descriptors: vec![DescriptorRecord {
                index: 0,
                kind: MobileKind::Player.as_u8(),
                pict_id: 447,
                name: b"Hero".to_vec(),
                colors: vec![],
            }],
            mobiles: vec![MobileRecord {
                index: 0,
                state: 0,
                h: 10,
                v: 20,
                colors: 0,
            }],
            ..DrawState::default()
        }
    }

    fn config(server: &FakeServer) -> SessionConfig<Vec<SessionState>> {
        SessionConfig::with_context(Vec::new())
            .server("127.0.0.1", server.addr().port())
            .character("Hero")
            .credentials(Credentials::password("hunter2"))
            .read_timeout(Duration::from_millis(100))
            .on_state_change(|_, to, seen: &mut Vec<SessionState>| seen.push(to))
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn credentials_forget_password() {
        let mut creds = Credentials::password("hunter2");
        assert_eq!(creds.key(), Some(PasswordHash::of("hunter2")));
        creds.forget(true);
        assert!(!creds.has_password());
        assert_eq!(creds.key(), Some(PasswordHash::of("hunter2")));
        creds.forget(false);
        assert!(creds.is_empty());
        assert!(!format!("{:?}", Credentials::password("hunter2")).contains("hunter2"));
    }

    #[test]
    fn commands_drain_slot_then_queue() {
        let mut commands = CommandQueue::default();
        commands.push("/who".into());
        commands.set("/sleep".into());
        commands.set("/pray".into());
        commands.push("/info".into());
        assert_eq!(commands.len(), 3);
        assert_eq!(commands.take().as_deref(), Some("/pray"));
        assert_eq!(commands.take().as_deref(), Some("/who"));
        assert_eq!(commands.take().as_deref(), Some("/info"));
        assert_eq!(commands.take(), None);
        assert!(commands.is_empty());
    }

    #[test]
    fn udp_reader_applies_frames_and_signals() {
        let (client, server) = memory::pair(([10, 0, 0, 1], 5010).into(), ([10, 0, 0, 2], 1).into());
        let rt = runtime(client, server.addr());
        let world = rt.world.clone();
        let link = rt.link.clone();
        let cancel = rt.cancel.clone();
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
        link.lock().last_send = Some(Instant::now());
        let task = thread::spawn(move || rt.udp_reader(frame_tx));

        let mut datagram = encode_frame(&encode_draw_state(&draw_state(1), true).unwrap()).unwrap();
        datagram.extend(encode_frame(&encode_draw_state(&draw_state(2), true).unwrap()).unwrap());
        server.send(&datagram, server.addr()).unwrap();
        frame_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        cancel.cancel();
        task.join().unwrap();
        let world = world.lock();
        assert_eq!(world.num_frames(), 2);
        assert_eq!(world.ack_frame(), 2);
        assert_eq!(world.descriptors()[&0].name, "Hero");
        assert!(link.lock().last_send.is_none());
        assert!(link.lock().clock.last_arrival().is_some());
    }

    #[test]
    fn input_sender_numbers_commands() {
        let (client, server) = memory::pair(([10, 0, 0, 1], 5010).into(), ([10, 0, 0, 2], 1).into());
        let rt = runtime(client, server.addr());
        rt.world
            .lock()
            .apply_draw_state(&draw_state(7), Instant::now())
            .unwrap();
        {
            let mut link = rt.link.lock();
            link.mouse_h = -3;
            link.mouse_down = true;
            link.commands.set("/who".into());
            link.commands.push("/info".into());
        }
        let cancel = rt.cancel.clone();
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
        let task = thread::spawn(move || rt.input_sender(frame_rx));

        let mut inputs = Vec::new();
        for _ in 0..3 {
            frame_tx.send(()).unwrap();
            let datagram = server.recv_within(Duration::from_secs(2)).unwrap();
            let frames = split_datagram(&datagram).unwrap();
            inputs.push(InputPacket::decode(frames[0]).unwrap());
        }
        cancel.cancel();
        task.join().unwrap();

        let nums: Vec<u32> = inputs.iter().map(|i| i.command_num).collect();
        assert_eq!(nums, vec![1, 2, 3]);
        let commands: Vec<&str> = inputs.iter().map(|i| i.command.as_str()).collect();
        assert_eq!(commands, vec!["/who", "/info", ""]);
        assert_eq!(inputs[0].ack_frame, 7);
        assert_eq!(inputs[0].resend_frame, 6);
        assert_eq!(inputs[0].mouse_h, -3);
        assert!(inputs[0].mouse_down());
    }

    #[test]
    fn handshake_reaches_awaiting_challenge() {
        let server = FakeServer::start(Script {
            stop_after_identifiers: true,
            ..Script::default()
        })
        .unwrap();
        let mut session = Session::new(config(&server).identification("me", "box", "/")).unwrap();
        let err = session.connect().unwrap_err();
        assert!(matches!(err, Error::Frame(FrameError::ConnectionClosed)), "{err}");

        let log = server.finish().unwrap();
        assert_eq!(log.hello, vec![0xFF, 0xFF, 0x00, 0x00, 0x00, 0x2A]);
        let ids = log.identifiers.unwrap();
        assert_eq!(ids.client_version, CLIENT_VERSION);
        assert_eq!(ids.username, "me");

        assert_eq!(
            session.context()[..],
            [
                SessionState::Resolving,
                SessionState::TcpConnecting,
                SessionState::ReceivingServerId,
                SessionState::UdpHandshake,
                SessionState::SendingIdentifiers,
                SessionState::AwaitingChallenge,
                SessionState::Disconnected,
                SessionState::Idle,
            ]
        );
        assert!(session.is_error());
        assert!(!session.has_credentials());
    }

    #[test]
    fn repeated_challenges_and_downgrade() {
        let server = FakeServer::start(Script {
            challenges: 2,
            server_version: 1000,
            result: LoginResult::BadPassword,
            ..Script::default()
        })
        .unwrap();
        let mut session = Session::new(config(&server).remember_password_hash(true)).unwrap();
        let err = session.connect().unwrap_err();
        assert!(matches!(
            err,
            Error::Login(LoginError::Rejected(LoginResult::BadPassword))
        ));

        let log = server.finish().unwrap();
        assert_eq!(log.logins.len(), 2);
        assert!(log.answers_ok);
        assert_eq!(log.logins[0].answer, log.logins[1].answer);
        assert_eq!(log.logins[0].client_version, 1000);
        assert_eq!(log.logins[0].name, "Hero");
        assert_eq!(session.client_version(), 1000);

        let seen = session.context();
        let answering = seen
            .iter()
            .filter(|s| **s == SessionState::AnsweringChallenge)
            .count();
        assert_eq!(answering, 2);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.has_credentials());
        assert!(session
            .take_console()
            .contains(&DISCONNECTED_MESSAGE.to_string()));
    }

    #[test]
    fn obsolete_client_points_at_upgrade() {
        let server = FakeServer::start(Script {
            result: LoginResult::from_code(-30972),
            ..Script::default()
        })
        .unwrap();
        let mut session = Session::new(config(&server)).unwrap();
        match session.connect() {
            Err(Error::Login(LoginError::Obsolete { code, url })) => {
                assert_eq!(code, -30972);
                assert_eq!(url, UPGRADE_URL);
            }
            other => panic!("unexpected {other:?}"),
        }
        server.finish().unwrap();
    }

    #[test]
    fn missing_credentials_fail_before_connecting() {
        let mut session = Session::with_transceiver(
            memory::pair(([10, 0, 0, 1], 1).into(), ([10, 0, 0, 2], 2).into()).0,
            SessionConfig::default(),
        );
        assert!(matches!(
            session.connect(),
            Err(Error::Login(LoginError::MissingCredentials))
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.is_error());
    }

    #[test]
    fn recording_mid_session_replays_known_descriptors() {
        let (client, _peer) = memory::pair(([10, 0, 0, 1], 1).into(), ([10, 0, 0, 2], 2).into());
        let session = Session::with_transceiver(client, SessionConfig::default());
        {
            let mut world = session.world.lock();
            world.begin();
            world.apply_draw_state(&draw_state(1), Instant::now()).unwrap();
        }
        let path = std::env::temp_dir().join(format!("clanlord-movie-{}.clMov", std::process::id()));
        session.record_to(&path).unwrap();

        let (udp, server) = memory::pair(([10, 0, 0, 3], 1).into(), ([10, 0, 0, 4], 2).into());
        let mut rt = runtime(udp, server.addr());
        rt.world = session.world.clone();
        rt.recorder = session.recorder.clone();
        rt.encrypted = false;
        let later = DrawState {
            descriptors: vec![],
            ..draw_state(2)
        };
        rt.record(&encode_draw_state(&later, false).unwrap());
        assert!(session.stop_recording().unwrap().is_some());

        let file = File::open(&path).unwrap();
        let mut player = crate::movie::MoviePlayer::open(file, Arc::new(NullCatalog)).unwrap();
        assert_eq!(player.play_to_end(Instant::now()).unwrap(), 1);
        let snap = player.snapshot(Instant::now(), &Presentation::default());
        assert_eq!(snap.descriptor(0).unwrap().name, "Hero");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn full_session_round_trip() {
        let server = FakeServer::start(Script {
            encrypted: true,
            draw_states: (1..=3).map(draw_state).collect(),
            info_text: Some(b"Welcome to the lands.".to_vec()),
            ..Script::default()
        })
        .unwrap();
        let mut session = Session::new(config(&server)).unwrap();
        session.connect().unwrap();
        session.queue_command("/who");
        assert!(session.is_connected());
        assert!(session.is_encrypted());

        let log = server.finish().unwrap();
        assert_eq!(log.inputs.len(), 3);
        assert!(log.inputs.iter().any(|i| i.command == "/who"));
        assert!(log
            .inputs
            .windows(2)
            .all(|w| w[0].command_num < w[1].command_num));

        wait_for(|| {
            session.update();
            session.state() == SessionState::Idle
        });
        let snap = session.snapshot(Instant::now());
        assert_eq!(snap.num_frames, 3);
        assert_eq!(snap.descriptor(0).unwrap().name, "Hero");
        let console = session.take_console();
        assert!(console.contains(&"Welcome to the lands.".to_string()));
        assert_eq!(console.last().map(String::as_str), Some(DISCONNECTED_MESSAGE));
        assert!(session.is_error());
        assert!(!session.has_credentials());
    }
}
