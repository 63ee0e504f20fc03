use std::{
    io::{self, ErrorKind, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};

use crate::{
    consts::{CLIENT_VERSION, MAX_DATAGRAM_SIZE},
    crypto::{answer_challenge, PasswordHash},
    draw::DrawState,
    framing::{encode_frame, read_frame, split_datagram, write_frame},
    packet::{
        encode_draw_state, encode_info_text, Challenge, Identifiers, InputPacket, LoginRequest,
        LoginResult, LogonResponse,
    },
};

const SERVER_TIMEOUT: Duration = Duration::from_secs(5);
const INPUT_TIMEOUT: Duration = Duration::from_secs(2);

/// What the fake server does with the one client it accepts.
#[derive(Debug, Clone)]
pub struct Script {
    pub server_id: [u8; 4],
    /// Sent after the client's UDP hello. Anything but 0 ends the login.
    pub confirm: i16,
    pub server_version: u32,
    pub password: String,
    pub challenges: usize,
    pub result: LoginResult,
    pub encrypted: bool,
    /// Hang up right after reading the identifiers.
    pub stop_after_identifiers: bool,
    /// Sent one at a time, each waiting for the client's input packet.
    pub draw_states: Vec<DrawState>,
    /// Sent over TCP once the draw states are done.
    pub info_text: Option<Vec<u8>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            server_id: [0, 0, 0, 0x2A],
            confirm: 0,
            server_version: CLIENT_VERSION,
            password: "hunter2".to_string(),
            challenges: 1,
            result: LoginResult::Ok,
            encrypted: false,
            stop_after_identifiers: false,
            draw_states: Vec::new(),
            info_text: None,
        }
    }
}

/// Everything the server saw from the client.
#[derive(Debug, Default)]
pub struct ServerLog {
    pub hello: Vec<u8>,
    pub identifiers: Option<Identifiers>,
    pub logins: Vec<LoginRequest>,
    /// Every login answered the challenge correctly.
    pub answers_ok: bool,
    pub inputs: Vec<InputPacket>,
}

/// A loopback game server. TCP and UDP share one port, as on the real
/// server.
pub struct FakeServer {
    addr: SocketAddr,
    release: Sender<()>,
    handle: JoinHandle<io::Result<ServerLog>>,
}

impl FakeServer {
    pub fn start(script: Script) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let addr = listener.local_addr()?;
        let udp = UdpSocket::bind(addr)?;
        let (release, released) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("fake-server".into())
            .spawn(move || serve(listener, udp, script, released))?;
        Ok(Self {
            addr,
            release,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Lets the server hang up and returns what it saw.
    pub fn finish(self) -> io::Result<ServerLog> {
        let _ = self.release.send(());
        self.handle
            .join()
            .map_err(|_| io::Error::new(ErrorKind::Other, "fake server panicked"))?
    }
}

fn invalid(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, e.to_string())
}

fn serve(
    listener: TcpListener,
    udp: UdpSocket,
    script: Script,
    released: Receiver<()>,
) -> io::Result<ServerLog> {
    let mut log = ServerLog::default();
    let (mut stream, _) = listener.accept()?;
    stream.set_read_timeout(Some(SERVER_TIMEOUT))?;
    udp.set_read_timeout(Some(SERVER_TIMEOUT))?;

    let mut preface = vec![0xFF, 0xFF];
    preface.extend_from_slice(&script.server_id);
    stream.write_all(&preface)?;

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let (len, client) = udp.recv_from(&mut buf)?;
    log.hello = buf[..len].to_vec();
    stream.write_all(&script.confirm.to_be_bytes())?;
    if script.confirm != 0 {
        return Ok(log);
    }

    let identifiers = read_frame(&mut stream).map_err(invalid)?;
    log.identifiers = Some(Identifiers::decode(&identifiers).map_err(invalid)?);
    if script.stop_after_identifiers {
        return Ok(log);
    }

    let key = PasswordHash::of(&script.password);
    let challenge = Challenge {
        server_version: script.server_version,
        challenge: *b"0123456789abcdef",
    };
    let expected = answer_challenge(&challenge.challenge, &key).map_err(invalid)?;
    log.answers_ok = true;
    for _ in 0..script.challenges {
        write_frame(&mut stream, &challenge.encode()).map_err(invalid)?;
        let request = read_frame(&mut stream).map_err(invalid)?;
        let request = LoginRequest::decode(&request).map_err(invalid)?;
        log.answers_ok &= request.answer == expected;
        log.logins.push(request);
    }
    let response = LogonResponse {
        result: script.result,
        encrypted: script.encrypted,
    };
    write_frame(&mut stream, &response.encode()).map_err(invalid)?;
    if !script.result.is_ok() {
        return Ok(log);
    }

    udp.set_read_timeout(Some(INPUT_TIMEOUT))?;
    for state in &script.draw_states {
        let payload = encode_draw_state(state, script.encrypted).map_err(invalid)?;
        udp.send_to(&encode_frame(&payload).map_err(invalid)?, client)?;
        match udp.recv_from(&mut buf) {
            Ok((len, _)) => {
                for frame in split_datagram(&buf[..len]).map_err(invalid)? {
                    log.inputs.push(InputPacket::decode(frame).map_err(invalid)?);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(e),
        }
    }
    if let Some(text) = &script.info_text {
        write_frame(&mut stream, &encode_info_text(text)).map_err(invalid)?;
    }

    let _ = released.recv_timeout(Duration::from_secs(10));
    Ok(log)
}
