//! ShadowsocksR obfuscation plugins.
//!
//! An obfs plugin wraps the cipher stream to look like something else
//! on the wire: `http_simple`/`http_post` hide the first bytes in a
//! percent-encoded request path, `tls1.2_ticket_auth` plays a faked
//! TLS 1.2 session with application-data record framing.

use rand::{Rng, RngCore};

use rp_core::crypto::hash::hmac_sha1;
use rp_core::error::{ProbeError, Result};

use super::ServerInfo;

/// Capability every obfs plugin exposes.
pub(crate) trait SsrObfs: Send {
    fn set_server_info(&mut self, info: &ServerInfo);

    /// Wraps outgoing wire bytes.
    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Unwraps incoming wire bytes; buffers partial frames internally.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Bytes the plugin must push to the server after a decode (the
    /// faked-TLS finished flight); drained by the stream driver.
    fn take_pending_reply(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn name(&self) -> &'static str;
}

/// Resolves an obfs name once, at dial time.
pub(crate) fn make_obfs(name: &str) -> Result<Box<dyn SsrObfs>> {
    match name {
        "plain" => Ok(Box::new(Plain)),
        "http_simple" => Ok(Box::new(HttpObfs::new(HttpVerb::Get))),
        "http_post" => Ok(Box::new(HttpObfs::new(HttpVerb::Post))),
        "tls1.2_ticket_auth" => Ok(Box::new(TlsTicketAuth::new())),
        other => Err(ProbeError::UnsupportedConfig(format!(
            "unknown ssr obfs {other}"
        ))),
    }
}

// === plain ===

struct Plain;

impl SsrObfs for Plain {
    fn set_server_info(&mut self, _info: &ServerInfo) {}

    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn name(&self) -> &'static str {
        "plain"
    }
}

// === http_simple / http_post ===

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/55.0.2883.87 Safari/537.36",
    "Mozilla/5.0 (Windows NT 6.3; WOW64; rv:40.0) Gecko/20100101 Firefox/40.0",
    "Mozilla/5.0 (compatible; MSIE 10.0; Windows NT 6.2; Trident/6.0)",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/51.0.2704.106 Safari/537.36",
];

#[derive(Clone, Copy)]
enum HttpVerb {
    Get,
    Post,
}

struct HttpObfs {
    verb: HttpVerb,
    host: String,
    port: u16,
    iv_len: usize,
    head_len: usize,
    has_sent_header: bool,
    has_recv_header: bool,
    recv_buf: Vec<u8>,
}

impl HttpObfs {
    fn new(verb: HttpVerb) -> Self {
        Self {
            verb,
            host: String::new(),
            port: 80,
            iv_len: 0,
            head_len: 30,
            has_sent_header: false,
            has_recv_header: false,
            recv_buf: Vec::new(),
        }
    }

    fn percent_hex(data: &[u8]) -> String {
        let mut out = String::with_capacity(data.len() * 3);
        for byte in data {
            out.push('%');
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl SsrObfs for HttpObfs {
    fn set_server_info(&mut self, info: &ServerInfo) {
        // obfs-param overrides the Host header; "host1,host2" picks one.
        let host = info.param.clone().unwrap_or_default();
        let host = host.split('#').next().unwrap_or_default();
        if host.is_empty() {
            self.host = info.host.clone();
        } else {
            let candidates: Vec<&str> = host.split(',').collect();
            let pick = rand::thread_rng().gen_range(0..candidates.len());
            self.host = candidates[pick].to_string();
        }
        self.port = info.port;
        self.iv_len = info.iv.len();
        self.head_len = info.head_size;
    }

    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.has_sent_header {
            return Ok(data.to_vec());
        }
        let head_size = self.iv_len + self.head_len;
        let head_len = if data.len() > head_size + 64 {
            head_size + rand::thread_rng().gen_range(0..64)
        } else {
            data.len()
        };
        let (head, rest) = data.split_at(head_len);

        let host_port = if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        };
        let ua = USER_AGENTS[rand::thread_rng().gen_range(0..USER_AGENTS.len())];

        let mut request = String::with_capacity(256 + head.len() * 3);
        match self.verb {
            HttpVerb::Get => {
                request.push_str("GET /");
            }
            HttpVerb::Post => {
                request.push_str("POST /");
            }
        }
        request.push_str(&Self::percent_hex(head));
        request.push_str(" HTTP/1.1\r\nHost: ");
        request.push_str(&host_port);
        request.push_str("\r\nUser-Agent: ");
        request.push_str(ua);
        request.push_str("\r\nAccept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n");
        request.push_str("Accept-Language: en-US,en;q=0.8\r\nAccept-Encoding: gzip, deflate\r\n");
        if matches!(self.verb, HttpVerb::Post) {
            let mut boundary = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut boundary);
            request.push_str("Content-Type: multipart/form-data; boundary=");
            request.push_str(&hex::encode(boundary));
            request.push_str("\r\n");
        }
        request.push_str("DNT: 1\r\nConnection: keep-alive\r\n\r\n");

        let mut out = request.into_bytes();
        out.extend_from_slice(rest);
        self.has_sent_header = true;
        Ok(out)
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.has_recv_header {
            return Ok(data.to_vec());
        }
        self.recv_buf.extend_from_slice(data);
        if let Some(pos) = self
            .recv_buf
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
        {
            let body = self.recv_buf.split_off(pos + 4);
            self.recv_buf.clear();
            self.has_recv_header = true;
            Ok(body)
        } else {
            if self.recv_buf.len() > 8192 {
                return Err(ProbeError::crypto("http obfs response header too large"));
            }
            Ok(Vec::new())
        }
    }

    fn name(&self) -> &'static str {
        match self.verb {
            HttpVerb::Get => "http_simple",
            HttpVerb::Post => "http_post",
        }
    }
}

// === tls1.2_ticket_auth ===

/// Faked TLS record/handshake constants.
const TLS_VERSION: [u8; 2] = [0x03, 0x03];
const REC_HANDSHAKE: u8 = 0x16;
const REC_CHANGE_CIPHER_SPEC: u8 = 0x14;
const REC_APPLICATION_DATA: u8 = 0x17;

/// Cipher-suite list advertised by the faked ClientHello.
const HELLO_CIPHERS: &[u8] = &[
    0x00, 0x1c, 0xc0, 0x2b, 0xc0, 0x2f, 0xcc, 0xa9, 0xcc, 0xa8, 0xcc, 0x14, 0xcc, 0x13, 0xc0,
    0x0a, 0xc0, 0x14, 0xc0, 0x09, 0xc0, 0x13, 0x00, 0x9c, 0x00, 0x35, 0x00, 0x2f, 0x00, 0x0a,
];

#[derive(PartialEq, Eq)]
enum TlsState {
    /// ClientHello not sent yet.
    Initial,
    /// Hello sent, waiting for the server flight.
    HelloSent,
    /// Finished flight sent, plain record framing from here on.
    Established,
}

struct TlsTicketAuth {
    state: TlsState,
    key: Vec<u8>,
    host: String,
    client_id: [u8; 32],
    send_buf: Vec<u8>,
    recv_buf: Vec<u8>,
    pending_reply: Option<Vec<u8>>,
}

impl TlsTicketAuth {
    fn new() -> Self {
        let mut client_id = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut client_id);
        Self {
            state: TlsState::Initial,
            key: Vec::new(),
            host: String::new(),
            client_id,
            send_buf: Vec::new(),
            recv_buf: Vec::new(),
            pending_reply: None,
        }
    }

    fn auth_key(&self) -> Vec<u8> {
        [self.key.as_slice(), self.client_id.as_slice()].concat()
    }

    /// 32-byte authenticated random: utc(4,BE) ‖ rand(18) ‖ hmac[..10].
    fn pack_auth_data(&self) -> Vec<u8> {
        let utc = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        let mut data = Vec::with_capacity(32);
        data.extend_from_slice(&utc.to_be_bytes());
        let mut random = [0u8; 18];
        rand::thread_rng().fill_bytes(&mut random);
        data.extend_from_slice(&random);
        let mac = hmac_sha1(&self.auth_key(), &data);
        data.extend_from_slice(&mac[..10]);
        data
    }

    fn app_data_frames(buf: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(buf.len() + 16);
        let mut rest = buf;
        while !rest.is_empty() {
            let size = if rest.len() > 2048 {
                (rand::thread_rng().gen::<u16>() as usize % 4096 + 100).min(rest.len())
            } else {
                rest.len()
            };
            out.push(REC_APPLICATION_DATA);
            out.extend_from_slice(&TLS_VERSION);
            out.extend_from_slice(&(size as u16).to_be_bytes());
            out.extend_from_slice(&rest[..size]);
            rest = &rest[size..];
        }
        out
    }

    fn sni_extension(host: &str) -> Vec<u8> {
        let name = host.as_bytes();
        let mut ext = Vec::with_capacity(name.len() + 9);
        ext.extend_from_slice(&[0x00, 0x00]);
        ext.extend_from_slice(&((name.len() + 5) as u16).to_be_bytes());
        ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        ext.push(0x00);
        ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
        ext.extend_from_slice(name);
        ext
    }

    fn client_hello(&mut self) -> Vec<u8> {
        let mut rng = rand::thread_rng();

        let mut body = Vec::with_capacity(512);
        body.extend_from_slice(&TLS_VERSION);
        body.extend_from_slice(&self.pack_auth_data());
        body.push(0x20);
        body.extend_from_slice(&self.client_id);
        body.extend_from_slice(HELLO_CIPHERS);
        body.extend_from_slice(&[0x01, 0x00]);

        let mut ext = Vec::with_capacity(256);
        // renegotiation_info
        ext.extend_from_slice(&[0xff, 0x01, 0x00, 0x01, 0x00]);
        ext.extend_from_slice(&Self::sni_extension(&self.host));
        // extended_master_secret
        ext.extend_from_slice(&[0x00, 0x17, 0x00, 0x00]);
        // session ticket carrying hmac-authed filler
        let ticket_len = (rng.gen::<u16>() as usize % 17) * 16 + 32;
        let mut ticket = vec![0u8; ticket_len - 10];
        rng.fill_bytes(&mut ticket);
        let mac = hmac_sha1(&self.auth_key(), &ticket);
        ticket.extend_from_slice(&mac[..10]);
        ext.extend_from_slice(&[0x00, 0x23]);
        ext.extend_from_slice(&(ticket.len() as u16).to_be_bytes());
        ext.extend_from_slice(&ticket);
        // signature_algorithms
        ext.extend_from_slice(&[
            0x00, 0x0d, 0x00, 0x16, 0x00, 0x14, 0x06, 0x01, 0x06, 0x03, 0x05, 0x01, 0x05, 0x03,
            0x04, 0x01, 0x04, 0x03, 0x03, 0x01, 0x03, 0x03, 0x02, 0x01, 0x02, 0x03,
        ]);
        // status_request
        ext.extend_from_slice(&[0x00, 0x05, 0x00, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00]);
        // ec_point_formats + supported_groups
        ext.extend_from_slice(&[0x00, 0x0b, 0x00, 0x04, 0x03, 0x00, 0x01, 0x02]);
        ext.extend_from_slice(&[
            0x00, 0x0a, 0x00, 0x06, 0x00, 0x04, 0x00, 0x17, 0x00, 0x18,
        ]);

        body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        body.extend_from_slice(&ext);

        let mut hello = Vec::with_capacity(body.len() + 9);
        hello.push(0x01);
        hello.push(0x00);
        hello.extend_from_slice(&(body.len() as u16).to_be_bytes());
        hello.extend_from_slice(&body);

        let mut record = Vec::with_capacity(hello.len() + 5);
        record.push(REC_HANDSHAKE);
        record.extend_from_slice(&[0x03, 0x01]);
        record.extend_from_slice(&(hello.len() as u16).to_be_bytes());
        record.extend_from_slice(&hello);
        record
    }

    /// ChangeCipherSpec + authenticated Finished + buffered app data.
    fn finished_flight(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(43 + self.send_buf.len());
        out.push(REC_CHANGE_CIPHER_SPEC);
        out.extend_from_slice(&TLS_VERSION);
        out.extend_from_slice(&[0x00, 0x01, 0x01]);
        out.push(REC_HANDSHAKE);
        out.extend_from_slice(&TLS_VERSION);
        out.extend_from_slice(&[0x00, 0x20]);
        let mut random = [0u8; 22];
        rand::thread_rng().fill_bytes(&mut random);
        out.extend_from_slice(&random);
        let mac = hmac_sha1(&self.auth_key(), &out);
        out.extend_from_slice(&mac[..10]);
        out.extend_from_slice(&std::mem::take(&mut self.send_buf));
        out
    }
}

impl SsrObfs for TlsTicketAuth {
    fn set_server_info(&mut self, info: &ServerInfo) {
        self.key = info.key.clone();
        let param = info.param.clone().unwrap_or_default();
        let host = if param.is_empty() {
            info.host.clone()
        } else {
            let candidates: Vec<&str> = param.split(',').collect();
            candidates[rand::thread_rng().gen_range(0..candidates.len())].to_string()
        };
        // Bare IPs get no SNI.
        self.host = if host.chars().last().is_some_and(|c| c.is_ascii_digit()) {
            String::new()
        } else {
            host
        };
    }

    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self.state {
            TlsState::Established => Ok(Self::app_data_frames(data)),
            TlsState::Initial => {
                if !data.is_empty() {
                    self.send_buf.extend_from_slice(&Self::app_data_frames(data));
                }
                self.state = TlsState::HelloSent;
                Ok(self.client_hello())
            }
            TlsState::HelloSent => {
                // Queue until the server flight arrives.
                if !data.is_empty() {
                    self.send_buf.extend_from_slice(&Self::app_data_frames(data));
                }
                Ok(Vec::new())
            }
        }
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.state == TlsState::Established {
            self.recv_buf.extend_from_slice(data);
            let mut out = Vec::new();
            while self.recv_buf.len() >= 5 {
                if self.recv_buf[0] != REC_APPLICATION_DATA {
                    return Err(ProbeError::crypto("unexpected tls record type"));
                }
                let size =
                    u16::from_be_bytes([self.recv_buf[3], self.recv_buf[4]]) as usize;
                if self.recv_buf.len() < size + 5 {
                    break;
                }
                out.extend_from_slice(&self.recv_buf[5..5 + size]);
                self.recv_buf.drain(..size + 5);
            }
            return Ok(out);
        }

        // Server flight: verify the authenticated ServerHello random.
        self.recv_buf.extend_from_slice(data);
        if self.recv_buf.len() < 43 {
            return Ok(Vec::new());
        }
        if self.recv_buf[0] != REC_HANDSHAKE {
            return Err(ProbeError::handshake("tls obfs: not a handshake record"));
        }
        let verify = &self.recv_buf[11..33];
        let mac = hmac_sha1(&self.auth_key(), verify);
        if mac[..10] != self.recv_buf[33..43] {
            return Err(ProbeError::handshake("tls obfs: server hello auth mismatch"));
        }
        self.recv_buf.clear();
        self.state = TlsState::Established;
        self.pending_reply = Some(self.finished_flight());
        Ok(Vec::new())
    }

    fn take_pending_reply(&mut self) -> Option<Vec<u8>> {
        self.pending_reply.take()
    }

    fn name(&self) -> &'static str {
        "tls1.2_ticket_auth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(param: Option<&str>) -> ServerInfo {
        ServerInfo {
            host: "relay.example.com".into(),
            port: 8388,
            param: param.map(str::to_string),
            iv: vec![0x42; 16],
            key: vec![0x24; 16],
            head_size: 30,
            tcp_mss: 1460,
            overhead: 4,
        }
    }

    #[test]
    fn factory_resolves_known_names() {
        for name in ["plain", "http_simple", "http_post", "tls1.2_ticket_auth"] {
            assert_eq!(make_obfs(name).unwrap().name(), name);
        }
        assert!(make_obfs("random_head").is_err());
    }

    #[test]
    fn http_simple_wraps_first_packet_only() {
        let mut obfs = HttpObfs::new(HttpVerb::Get);
        obfs.set_server_info(&info(Some("download.windowsupdate.com")));
        let first = obfs.encode(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let text = String::from_utf8_lossy(&first);
        assert!(text.starts_with("GET /%de%ad%be%ef HTTP/1.1\r\n"));
        assert!(text.contains("Host: download.windowsupdate.com:8388\r\n"));
        assert!(text.ends_with("\r\n\r\n"));

        let second = obfs.encode(b"raw bytes").unwrap();
        assert_eq!(second, b"raw bytes");
    }

    #[test]
    fn http_simple_splits_long_first_packet() {
        let mut obfs = HttpObfs::new(HttpVerb::Get);
        obfs.set_server_info(&info(None));
        let data = vec![0x11u8; 400];
        let out = obfs.encode(&data).unwrap();
        // The percent-encoded head covers at most head_size + 64 bytes;
        // the rest rides behind the blank line untouched.
        let text_end = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert!(out.len() - text_end >= 400 - (16 + 30 + 64));
    }

    #[test]
    fn http_decode_strips_response_headers_across_reads() {
        let mut obfs = HttpObfs::new(HttpVerb::Get);
        obfs.set_server_info(&info(None));
        assert!(obfs.decode(b"HTTP/1.1 200 OK\r\nConn").unwrap().is_empty());
        let body = obfs.decode(b"ection: keep-alive\r\n\r\npayload").unwrap();
        assert_eq!(body, b"payload");
        assert_eq!(obfs.decode(b"more").unwrap(), b"more");
    }

    #[test]
    fn http_post_carries_boundary() {
        let mut obfs = HttpObfs::new(HttpVerb::Post);
        obfs.set_server_info(&info(None));
        let first = obfs.encode(&[0x01]).unwrap();
        let text = String::from_utf8_lossy(&first);
        assert!(text.starts_with("POST /%01 HTTP/1.1\r\n"));
        assert!(text.contains("multipart/form-data; boundary="));
    }

    #[test]
    fn tls_handshake_flow() {
        let mut obfs = TlsTicketAuth::new();
        obfs.set_server_info(&info(None));

        let hello = obfs.encode(b"first payload").unwrap();
        assert_eq!(hello[0], REC_HANDSHAKE);
        assert_eq!(&hello[1..3], &[0x03, 0x01]);
        let declared = u16::from_be_bytes([hello[3], hello[4]]) as usize;
        assert_eq!(declared + 5, hello.len());
        // ClientHello carries the authed random at offset 11.
        let mac = hmac_sha1(&obfs.auth_key(), &hello[11..33]);
        assert_eq!(&hello[33..43], &mac[..10]);

        // Server flight: handshake record with an authed random.
        let mut flight = vec![REC_HANDSHAKE, 0x03, 0x03, 0x00, 0x40];
        let mut random = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut random);
        flight.extend_from_slice(&random); // through offset 11
        let mut verify = [0u8; 22];
        rand::thread_rng().fill_bytes(&mut verify);
        flight.extend_from_slice(&verify);
        let mac = hmac_sha1(&obfs.auth_key(), &verify);
        flight.extend_from_slice(&mac[..10]);

        assert!(obfs.decode(&flight).unwrap().is_empty());
        let reply = obfs.take_pending_reply().expect("finished flight queued");
        assert_eq!(reply[0], REC_CHANGE_CIPHER_SPEC);
        // Buffered payload rides behind the finished record as app data.
        let app_at = reply
            .windows(1)
            .position(|w| w[0] == REC_APPLICATION_DATA)
            .unwrap();
        assert!(app_at > 0);

        // Established: data is framed and unframed as app-data records.
        let framed = obfs.encode(b"hello").unwrap();
        assert_eq!(framed[0], REC_APPLICATION_DATA);
        assert_eq!(u16::from_be_bytes([framed[3], framed[4]]), 5);
        let mut echo = framed.clone();
        echo.extend_from_slice(&obfs.encode(b" world").unwrap());
        assert_eq!(obfs.decode(&echo).unwrap(), b"hello world");
    }

    #[test]
    fn tls_rejects_bad_server_auth() {
        let mut obfs = TlsTicketAuth::new();
        obfs.set_server_info(&info(None));
        let _ = obfs.encode(b"x").unwrap();
        let mut flight = vec![REC_HANDSHAKE, 0x03, 0x03, 0x00, 0x40];
        flight.extend_from_slice(&[0u8; 38]);
        assert!(obfs.decode(&flight).is_err());
    }

    #[test]
    fn tls_skips_sni_for_ip_hosts() {
        let mut obfs = TlsTicketAuth::new();
        obfs.set_server_info(&ServerInfo {
            host: "203.0.113.7".into(),
            ..info(None)
        });
        assert!(obfs.host.is_empty());
    }
}
