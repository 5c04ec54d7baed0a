/*!
Stream backend that talks to a legacy key stream server over TCP.

One connection is opened per key stream and kept until CLOSE, or until
an exchange on it fails. The server is taken from a `server://host:port`
destination URI when the caller gives one, otherwise from the backend
configuration. The server owns the session state; this backend only
frames requests and maps the statuses it answers with. A `QOS_NOT_MET`
answer still opens the stream, with the QoS the server offered.
*/

use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::core::backend::StreamBackend;
use crate::core::constants::legacy::{
    CONNECT_TIMEOUT_SECS, DEFAULT_SERVER_ADDRESS, DEFAULT_SERVER_PORT, SERVER_URI_SCHEME,
};
use crate::core::error::{Error, Result, format_err};
use crate::stream::types::{Ksid, MetadataBuffer, OpenRequest, OpenResponse, StreamStatus};
use crate::stream::wire::{
    CloseRequest, CloseResponse, GetKeyRequest, GetKeyResponse, OpenConnectRequest,
    OpenConnectResponse, ServiceType, read_frame, write_frame,
};

/// Server location for the legacy backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for LegacyServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// Legacy wire protocol client
pub struct LegacyStreamBackend {
    server: LegacyServerConfig,
    connections: HashMap<Ksid, TcpStream>,
}

impl LegacyStreamBackend {
    pub fn new(server: LegacyServerConfig) -> Self {
        Self {
            server,
            connections: HashMap::new(),
        }
    }

    pub fn server(&self) -> &LegacyServerConfig {
        &self.server
    }

    /// Server named by a `server://host[:port]` destination, else the configured one
    fn server_for(&self, destination: &str) -> Result<(String, u16)> {
        let Some(authority) = destination.strip_prefix(SERVER_URI_SCHEME) else {
            return Ok((self.server.address.clone(), self.server.port));
        };
        let authority = authority.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| Error::NoConnection(format!("invalid port in destination {destination:?}")))?;
                (host, port)
            }
            None => (authority, DEFAULT_SERVER_PORT),
        };
        if host.is_empty() {
            return Err(Error::NoConnection(format!("no host in destination {destination:?}")));
        }
        Ok((host.to_string(), port))
    }

    fn connect(&self, host: &str, port: u16, timeout_ms: u32) -> Result<TcpStream> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::NoConnection(format!("cannot resolve {host}")))?;

        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .map_err(|err| {
                error!("Connection to {addr} failed: {err}");
                Error::NoConnection(format!("{addr}: {err}"))
            })?;
        if timeout_ms > 0 {
            stream.set_read_timeout(Some(Duration::from_millis(u64::from(timeout_ms))))?;
        }
        info!("Connected to key stream server at {addr}");
        Ok(stream)
    }
}

/// Send a request and read the matching response payload
fn exchange(stream: &mut TcpStream, service: ServiceType, payload: &[u8], timeout_ms: u64) -> Result<Vec<u8>> {
    write_frame(stream, service, payload)?;
    let (header, body) = read_frame(stream).map_err(|err| match err {
        Error::Io(io) if matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) => {
            Error::Timeout(timeout_ms)
        }
        other => other,
    })?;
    debug!(
        "Received {:?} from server, version {}.{}.{}",
        header.service, header.major, header.minor, header.patch
    );
    if Some(header.service) != service.response() {
        return format_err(format!("expected response to {service:?}, got {:?}", header.service));
    }
    Ok(body)
}

fn read_timeout_ms(stream: &TcpStream) -> u64 {
    stream
        .read_timeout()
        .ok()
        .flatten()
        .map_or(0, |timeout| timeout.as_millis() as u64)
}

impl StreamBackend for LegacyStreamBackend {
    fn name(&self) -> &str {
        "legacy"
    }

    fn open_connect(&mut self, request: &OpenRequest<'_>) -> Result<OpenResponse> {
        if !request.ksid.is_zero() && self.connections.contains_key(&request.ksid) {
            return Err(Error::KsidInUse(request.ksid));
        }

        let (host, port) = self.server_for(request.destination)?;
        let mut stream = self.connect(&host, port, request.qos.timeout)?;
        let payload = OpenConnectRequest {
            source: request.source.to_string(),
            destination: request.destination.to_string(),
            qos: request.qos.clone(),
            ksid: request.ksid,
        }
        .encode()?;
        debug!("OPEN_CONNECT {} -> {} with {:?}", request.source, request.destination, request.qos);

        let timeout = u64::from(request.qos.timeout);
        let response = OpenConnectResponse::decode(&exchange(
            &mut stream,
            ServiceType::OpenConnectRequest,
            &payload,
            timeout,
        )?)?;

        match response.status {
            StreamStatus::Success | StreamStatus::PeerDisconnected => {}
            StreamStatus::QosNotMet => warn!("QoS not met, server offered {:?}", response.qos),
            status => {
                error!("OPEN_CONNECT failed with status {status}");
                return Err(Error::PeerStatus(status));
            }
        }

        let ksid = match response.ksid {
            Some(ksid) if !ksid.is_zero() => ksid,
            _ => return format_err("OPEN_CONNECT response without a KSID"),
        };
        let qos = response.qos.unwrap_or_else(|| request.qos.clone());
        if qos.timeout > 0 {
            stream.set_read_timeout(Some(Duration::from_millis(u64::from(qos.timeout))))?;
        }

        if self.connections.contains_key(&ksid) {
            error!("Server assigned {ksid}, which already has a connection");
            return Err(Error::KsidInUse(ksid));
        }

        info!("OPEN_CONNECT status {}, key stream {ksid}", response.status);
        self.connections.insert(ksid, stream);
        Ok(OpenResponse {
            ksid,
            status: response.status,
            qos,
        })
    }

    fn get_key(&mut self, ksid: &Ksid, index: u32, metadata: Option<&mut MetadataBuffer>) -> Result<Vec<u8>> {
        let stream = self.connections.get_mut(ksid).ok_or(Error::PeerNotConnected(*ksid))?;
        let metadata_size = metadata.as_ref().map_or(0, |buffer| buffer.capacity());
        let payload = GetKeyRequest {
            ksid: *ksid,
            index,
            metadata_size: u32::try_from(metadata_size).unwrap_or(u32::MAX),
        }
        .encode();

        let timeout = read_timeout_ms(stream);
        let response = match exchange(stream, ServiceType::GetKeyRequest, &payload, timeout)
            .and_then(|body| GetKeyResponse::decode(&body))
        {
            Ok(response) => response,
            Err(err) => {
                // a late reply would be taken as the answer to the next request
                warn!("Dropping connection for {ksid} after failed GET_KEY: {err}");
                self.connections.remove(ksid);
                return Err(err);
            }
        };
        if response.status != StreamStatus::Success {
            error!("GET_KEY failed with status {}", response.status);
            return Err(Error::PeerStatus(response.status));
        }

        if let Some(buffer) = metadata {
            buffer.fill(&response.metadata)?;
        }
        debug!("GET_KEY index {} on {ksid}: {} bytes", response.index, response.key.len());
        Ok(response.key)
    }

    fn close(&mut self, ksid: &Ksid) -> Result<()> {
        let mut stream = self.connections.remove(ksid).ok_or(Error::PeerNotConnected(*ksid))?;
        let timeout = read_timeout_ms(&stream);
        let payload = CloseRequest { ksid: *ksid }.encode();
        let response = CloseResponse::decode(&exchange(&mut stream, ServiceType::CloseRequest, &payload, timeout)?)?;
        if response.status != StreamStatus::Success {
            error!("CLOSE failed with status {}", response.status);
            return Err(Error::PeerStatus(response.status));
        }
        info!("CLOSE on key stream {ksid}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::Qos;
    use crate::stream::wire::FrameHeader;
    use std::net::TcpListener;
    use std::thread;

    fn backend_for(listener: &TcpListener) -> LegacyStreamBackend {
        let addr = listener.local_addr().unwrap();
        LegacyStreamBackend::new(LegacyServerConfig {
            address: addr.ip().to_string(),
            port: addr.port(),
        })
    }

    #[test]
    fn test_open_get_close_against_mock_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = backend_for(&listener);
        let server_ksid = Ksid::generate();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();

            let (header, payload) = read_frame(&mut conn).unwrap();
            assert_eq!(header.service, ServiceType::OpenConnectRequest);
            let open = OpenConnectRequest::decode(&payload).unwrap();
            assert_eq!(open.source, "qkd://alice");
            assert!(open.ksid.is_zero());
            let reply = OpenConnectResponse {
                status: StreamStatus::Success,
                qos: Some(open.qos),
                ksid: Some(server_ksid),
            };
            write_frame(&mut conn, ServiceType::OpenConnectResponse, &reply.encode().unwrap()).unwrap();

            let (_, payload) = read_frame(&mut conn).unwrap();
            let get = GetKeyRequest::decode(&payload).unwrap();
            assert_eq!(get.index, 2);
            assert_eq!(get.metadata_size, 64);
            let reply = GetKeyResponse {
                status: StreamStatus::Success,
                index: get.index,
                key: vec![0xAB; 32],
                metadata: br#"{"age": 5, "hops": 0}"#.to_vec(),
            };
            write_frame(&mut conn, ServiceType::GetKeyResponse, &reply.encode().unwrap()).unwrap();

            let (_, payload) = read_frame(&mut conn).unwrap();
            assert_eq!(CloseRequest::decode(&payload).unwrap().ksid, server_ksid);
            let reply = CloseResponse { status: StreamStatus::Success };
            write_frame(&mut conn, ServiceType::CloseResponse, &reply.encode()).unwrap();
        });

        let qos = Qos::default();
        let opened = backend
            .open_connect(&OpenRequest {
                source: "qkd://alice",
                destination: "qkd://bob",
                qos: &qos,
                ksid: Ksid::zero(),
            })
            .unwrap();
        assert_eq!(opened.ksid, server_ksid);

        let mut metadata = MetadataBuffer::with_capacity(64);
        let key = backend.get_key(&server_ksid, 2, Some(&mut metadata)).unwrap();
        assert_eq!(key, vec![0xAB; 32]);
        assert!(metadata.as_str().unwrap().contains("hops"));

        backend.close(&server_ksid).unwrap();
        assert!(matches!(backend.close(&server_ksid), Err(Error::PeerNotConnected(_))));
        server.join().unwrap();
    }

    #[test]
    fn test_server_failure_status_is_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = backend_for(&listener);
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let _ = read_frame(&mut conn).unwrap();
            let reply = OpenConnectResponse {
                status: StreamStatus::KsidInUse,
                qos: None,
                ksid: None,
            };
            write_frame(&mut conn, ServiceType::OpenConnectResponse, &reply.encode().unwrap()).unwrap();
        });

        let qos = Qos::default();
        let err = backend
            .open_connect(&OpenRequest {
                source: "a",
                destination: "b",
                qos: &qos,
                ksid: Ksid::generate(),
            })
            .unwrap_err();
        assert_eq!(err.stream_status(), StreamStatus::KsidInUse);
        server.join().unwrap();
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = backend_for(&listener);
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let _ = FrameHeader::read(&mut conn);
            thread::sleep(Duration::from_millis(300));
        });

        let qos = Qos {
            timeout: 50,
            ..Qos::default()
        };
        let err = backend
            .open_connect(&OpenRequest {
                source: "a",
                destination: "b",
                qos: &qos,
                ksid: Ksid::zero(),
            })
            .unwrap_err();
        assert_eq!(err.stream_status(), StreamStatus::Timeout);
        server.join().unwrap();
    }

    #[test]
    fn test_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = backend_for(&listener);
        drop(listener);

        let qos = Qos::default();
        let err = backend
            .open_connect(&OpenRequest {
                source: "a",
                destination: "b",
                qos: &qos,
                ksid: Ksid::zero(),
            })
            .unwrap_err();
        assert_eq!(err.stream_status(), StreamStatus::NoConnection);
    }

    fn open_reply(conn: &mut TcpStream, status: StreamStatus, qos: Qos, ksid: Ksid) -> OpenConnectRequest {
        let (_, payload) = read_frame(conn).unwrap();
        let open = OpenConnectRequest::decode(&payload).unwrap();
        let reply = OpenConnectResponse {
            status,
            qos: Some(qos),
            ksid: Some(ksid),
        };
        write_frame(conn, ServiceType::OpenConnectResponse, &reply.encode().unwrap()).unwrap();
        open
    }

    #[test]
    fn test_qos_not_met_opens_with_offered_qos() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = backend_for(&listener);
        let server_ksid = Ksid::generate();
        let offered = Qos {
            key_chunk_size: 16,
            max_bps: 8_000,
            ..Qos::default()
        };

        let server_qos = offered.clone();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            open_reply(&mut conn, StreamStatus::QosNotMet, server_qos, server_ksid);

            let (_, payload) = read_frame(&mut conn).unwrap();
            assert_eq!(CloseRequest::decode(&payload).unwrap().ksid, server_ksid);
            let reply = CloseResponse { status: StreamStatus::Success };
            write_frame(&mut conn, ServiceType::CloseResponse, &reply.encode()).unwrap();
        });

        let qos = Qos::default();
        let opened = backend
            .open_connect(&OpenRequest {
                source: "a",
                destination: "b",
                qos: &qos,
                ksid: Ksid::zero(),
            })
            .unwrap();
        assert_eq!(opened.status, StreamStatus::QosNotMet);
        assert_eq!(opened.ksid, server_ksid);
        assert_eq!(opened.qos, offered);

        // the connection was kept
        backend.close(&server_ksid).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_destination_uri_names_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let destination = format!("server://127.0.0.1:{}", listener.local_addr().unwrap().port());
        let server_ksid = Ksid::generate();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let open = open_reply(&mut conn, StreamStatus::Success, Qos::default(), server_ksid);
            assert!(open.destination.starts_with("server://127.0.0.1:"));
        });

        // the configured server does not resolve; only the URI can be used
        let mut backend = LegacyStreamBackend::new(LegacyServerConfig {
            address: "qkd-server.invalid".into(),
            port: 1,
        });
        let qos = Qos::default();
        let opened = backend
            .open_connect(&OpenRequest {
                source: "a",
                destination: &destination,
                qos: &qos,
                ksid: Ksid::zero(),
            })
            .unwrap();
        assert_eq!(opened.ksid, server_ksid);
        server.join().unwrap();
    }

    #[test]
    fn test_server_location_parsing() {
        let backend = LegacyStreamBackend::new(LegacyServerConfig::default());
        assert_eq!(
            backend.server_for("server://kme.example").unwrap(),
            ("kme.example".to_string(), DEFAULT_SERVER_PORT)
        );
        assert_eq!(
            backend.server_for("server://10.0.0.5:9000/stream").unwrap(),
            ("10.0.0.5".to_string(), 9000)
        );
        assert_eq!(
            backend.server_for("qkd://bob").unwrap(),
            (DEFAULT_SERVER_ADDRESS.to_string(), DEFAULT_SERVER_PORT)
        );
        assert!(matches!(backend.server_for("server://host:port"), Err(Error::NoConnection(_))));
        assert!(matches!(backend.server_for("server://:25575"), Err(Error::NoConnection(_))));
    }

    #[test]
    fn test_timed_out_connection_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = backend_for(&listener);
        let server_ksid = Ksid::generate();
        let qos = Qos {
            timeout: 50,
            ..Qos::default()
        };

        let server_qos = qos.clone();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            open_reply(&mut conn, StreamStatus::Success, server_qos, server_ksid);
            let _ = read_frame(&mut conn);
            thread::sleep(Duration::from_millis(300));
        });

        backend
            .open_connect(&OpenRequest {
                source: "a",
                destination: "b",
                qos: &qos,
                ksid: Ksid::zero(),
            })
            .unwrap();

        let err = backend.get_key(&server_ksid, 0, None).unwrap_err();
        assert_eq!(err.stream_status(), StreamStatus::Timeout);
        assert!(matches!(
            backend.get_key(&server_ksid, 1, None),
            Err(Error::PeerNotConnected(_))
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_reused_server_ksid_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = backend_for(&listener);
        let server_ksid = Ksid::generate();
        let server = thread::spawn(move || {
            let mut conns = Vec::new();
            for _ in 0..2 {
                let (mut conn, _) = listener.accept().unwrap();
                open_reply(&mut conn, StreamStatus::Success, Qos::default(), server_ksid);
                conns.push(conn);
            }
        });

        let qos = Qos::default();
        let request = OpenRequest {
            source: "a",
            destination: "b",
            qos: &qos,
            ksid: Ksid::zero(),
        };
        assert!(backend.open_connect(&request).is_ok());
        let err = backend.open_connect(&request).unwrap_err();
        assert!(matches!(err, Error::KsidInUse(ksid) if ksid == server_ksid));
        server.join().unwrap();
    }
}
