//! Client tests that need no real partner server
//!
//! FTP and WebDAV run against small scripted servers on loopback; the
//! remaining cases fail before any network access.
//!
//! Scenarios against real servers are ignored by default:
//! ```bash
//! FTP_TEST_ADDRESS=127.0.0.1:21 cargo test --test remote_clients_test -- --ignored
//! SFTP_TEST_ADDRESS=127.0.0.1:22 SFTP_TEST_USER=bob SFTP_TEST_PASSWORD=secret \
//!     SFTP_TEST_HOST_KEY="$(cat /etc/ssh/ssh_host_ed25519_key.pub)" \
//!     cargo test --test remote_clients_test -- --ignored
//! ```

use base64::Engine;
use gateway_remote::catalog::{
    paths, Credential, CredentialType, MemoryCatalog, Partner, RemoteAccount, Rule,
};
use gateway_remote::client::ftp::DIAL_TIMEOUT;
use gateway_remote::client::{new_client, ClientError, ConnectTarget};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn partner(protocol: &str, address: &str, credentials: &[&str]) -> Partner {
    Partner {
        name: "remote".to_string(),
        protocol: protocol.to_string(),
        address: address.to_string(),
        proto_config: None,
        credentials: credentials.iter().map(|c| c.to_string()).collect(),
    }
}

fn account_with_password(catalog: &MemoryCatalog, login: &str, password: &str) -> RemoteAccount {
    catalog.add_account_credential(
        "remote",
        login,
        &Credential::new("pwd", CredentialType::Password, password),
    );
    RemoteAccount {
        login: login.to_string(),
        credentials: vec!["pwd".to_string()],
    }
}

fn catalog() -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    catalog.set_not_implemented(paths::ADDRESS_OVERRIDES);
    catalog
}

fn rule(remote_dir: &str) -> Rule {
    Rule {
        name: "pull".to_string(),
        remote_dir: remote_dir.to_string(),
        direction: None,
    }
}

// ---------------------------------------------------------------------------
// Factory and pre-dial failures
// ---------------------------------------------------------------------------

#[test]
fn test_unknown_protocol() {
    let err = new_client("gopher").err().unwrap();
    assert!(matches!(err, ClientError::UnknownProtocol(ref p) if p == "gopher"));
    assert!(err.is_fatal());
}

#[test]
fn test_sftp_without_host_key_fails_before_dial() {
    let catalog = catalog();
    // Not a resolvable host: reaching the network would fail differently.
    let partner = partner("sftp", "host.invalid:22", &[]);
    let account = account_with_password(&catalog, "bob", "sesame");

    let mut client = new_client("sftp").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();

    assert!(matches!(err, ClientError::NoHostKey), "got {:?}", err);
    client.close().unwrap();
}

/// authorized_keys line for a wire-encoded key of type `kind`
fn ssh_key_line(kind: &str, body: &[u8]) -> String {
    let mut blob = (kind.len() as u32).to_be_bytes().to_vec();
    blob.extend_from_slice(kind.as_bytes());
    blob.extend_from_slice(&(body.len() as u32).to_be_bytes());
    blob.extend_from_slice(body);
    format!("{} {}", kind, base64::engine::general_purpose::STANDARD.encode(blob))
}

fn sftp_partner(catalog: &MemoryCatalog, address: &str, host_key: &str) -> Partner {
    catalog.add_partner_credential(
        "remote",
        &Credential::new("hostkey", CredentialType::SshPublicKey, host_key),
    );
    partner("sftp", address, &["hostkey"])
}

#[test]
fn test_sftp_peer_is_not_ssh() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _ = stream.write_all(b"220 this is an FTP server\r\n");
    });

    let catalog = catalog();
    let partner = sftp_partner(&catalog, &address, &ssh_key_line("ssh-ed25519", &[7; 32]));
    let account = account_with_password(&catalog, "bob", "sesame");

    let mut client = new_client("sftp").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();
    assert!(matches!(err, ClientError::Connection { .. }), "got {:?}", err);

    let err = client.list(&rule(""), "*").unwrap_err();
    assert!(matches!(err, ClientError::NotConnected { .. }), "got {:?}", err);
    server.join().unwrap();
}

/// Real SFTP server settings: address, login, password and host key line
fn sftp_server_env() -> (String, String, String, String) {
    let var = |name: &str| std::env::var(name).unwrap_or_default();
    let address = std::env::var("SFTP_TEST_ADDRESS").unwrap_or_else(|_| "127.0.0.1:22".into());
    (address, var("SFTP_TEST_USER"), var("SFTP_TEST_PASSWORD"), var("SFTP_TEST_HOST_KEY"))
}

#[test]
#[ignore]
fn test_sftp_real_server() {
    let (address, login, password, host_key) = sftp_server_env();

    let catalog = catalog();
    let partner = sftp_partner(&catalog, &address, &host_key);
    let account = account_with_password(&catalog, &login, &password);

    let mut client = new_client("sftp").unwrap();
    client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap();
    let files = client.list(&rule(""), "*").unwrap();
    println!("{} files", files.len());
    client.close().unwrap();
}

#[test]
#[ignore]
fn test_sftp_real_server_wrong_host_key() {
    let (address, login, password, host_key) = sftp_server_env();
    // Same key type as the server's, so negotiation succeeds.
    let kind = host_key.split_whitespace().next().unwrap_or("ssh-ed25519");

    let catalog = catalog();
    let partner = sftp_partner(&catalog, &address, &ssh_key_line(kind, &[0; 32]));
    let account = account_with_password(&catalog, &login, &password);

    let mut client = new_client("sftp").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();
    assert!(matches!(err, ClientError::HostKeyMismatch), "got {:?}", err);
    assert!(err.is_fatal());
}

#[test]
fn test_control_plane_timeout_aborts_connect() {
    let catalog = catalog();
    let partner = partner("sftp", "host.invalid:22", &["hostkey"]);
    catalog.set_timeout(&paths::item(&paths::partner_credentials("remote"), "hostkey"));
    let account = account_with_password(&catalog, "bob", "sesame");

    let mut client = new_client("sftp").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();

    assert!(err.is_timeout(), "got {:?}", err);
    assert!(!err.is_fatal());
}

#[test]
fn test_missing_credential_fails_resolution() {
    let catalog = catalog();
    let partner = partner("ftp", "127.0.0.1:1", &[]);
    let account = RemoteAccount {
        login: "bob".to_string(),
        credentials: vec!["gone".to_string()],
    };

    let mut client = new_client("ftp").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();

    assert!(matches!(err, ClientError::PartialCredentials { .. }), "got {:?}", err);
}

#[test]
fn test_malformed_proto_config() {
    let catalog = catalog();
    let mut partner = partner("webdav", "127.0.0.1:1", &[]);
    partner.proto_config = Some(serde_json::json!({ "minTLSVersion": 12 }));
    let account = account_with_password(&catalog, "bob", "sesame");

    let mut client = new_client("webdav").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();

    assert!(matches!(err, ClientError::Config { .. }), "got {:?}", err);
}

// ---------------------------------------------------------------------------
// FTP
// ---------------------------------------------------------------------------

const FTP_LISTING: &str = "-rw-r--r-- 1 ftp ftp 120 Jan 01 12:00 a.csv\r\n\
-rw-r--r-- 1 ftp ftp 80 Jan 01 12:00 b.txt\r\n\
drwxr-xr-x 2 ftp ftp 4096 Jan 01 12:00 archive.csv\r\n\
-rw-r--r-- 1 ftp ftp 10 Jan 01 12:00 .partial.csv\r\n";

/// Scripted FTP server for one control connection
fn spawn_ftp(password: &'static str) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut commands = Vec::new();
        let mut data: Option<TcpListener> = None;

        writer.write_all(b"220 ready\r\n").unwrap();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            let (verb, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let verb = verb.to_ascii_uppercase();
            commands.push(line.clone());

            let reply = match verb.as_str() {
                "USER" => "331 password required".to_string(),
                "PASS" if arg == password => "230 logged in".to_string(),
                "PASS" => "530 login incorrect".to_string(),
                "EPSV" => {
                    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                    let port = listener.local_addr().unwrap().port();
                    data = Some(listener);
                    format!("229 Entering Extended Passive Mode (|||{}|)", port)
                }
                "LIST" => {
                    writer.write_all(b"150 listing\r\n").unwrap();
                    if let Some(listener) = data.take() {
                        let (mut conn, _) = listener.accept().unwrap();
                        conn.write_all(FTP_LISTING.as_bytes()).unwrap();
                    }
                    "226 done".to_string()
                }
                "QUIT" => {
                    writer.write_all(b"221 bye\r\n").unwrap();
                    break;
                }
                _ => "200 ok".to_string(),
            };
            writer.write_all(format!("{}\r\n", reply).as_bytes()).unwrap();
        }
        commands
    });

    (address, handle)
}

#[test]
fn test_ftp_list() {
    let (address, server) = spawn_ftp("sesame");
    let catalog = catalog();
    let partner = partner("ftp", &address, &[]);
    let account = account_with_password(&catalog, "bob", "sesame");

    let mut client = new_client("ftp").unwrap();
    client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap();
    let files = client.list(&rule("out"), "*.csv").unwrap();
    client.close().unwrap();

    assert_eq!(files, vec!["a.csv".to_string()]);

    let commands = server.join().unwrap();
    assert!(commands.contains(&"USER bob".to_string()));
    assert!(commands.contains(&"LIST out".to_string()), "got {:?}", commands);
}

#[test]
fn test_ftp_login_rejected() {
    let (address, server) = spawn_ftp("sesame");
    let catalog = catalog();
    let partner = partner("ftp", &address, &[]);
    let account = account_with_password(&catalog, "bob", "guess");

    let mut client = new_client("ftp").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();

    assert!(matches!(err, ClientError::Authentication { .. }), "got {:?}", err);
    assert!(matches!(
        client.list(&rule("out"), "*"),
        Err(ClientError::NotConnected { .. })
    ));
    server.join().unwrap();
}

#[test]
fn test_ftp_connection_refused() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let catalog = catalog();
    let partner = partner("ftp", &address, &[]);
    let account = account_with_password(&catalog, "bob", "sesame");

    let mut client = new_client("ftp").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();
    assert!(matches!(err, ClientError::Connection { .. }), "got {:?}", err);
}

#[test]
fn test_implicit_ftps_dial_is_bounded() {
    // Non-routable: a dial without a timeout would hang on it.
    let catalog = catalog();
    let mut partner = partner("ftps", "10.255.255.1:990", &[]);
    partner.proto_config = Some(serde_json::json!({ "useImplicitTLS": true }));
    let account = account_with_password(&catalog, "bob", "sesame");

    let started = Instant::now();
    let mut client = new_client("ftps").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();

    assert!(matches!(err, ClientError::Connection { .. }), "got {:?}", err);
    assert!(
        started.elapsed() < DIAL_TIMEOUT + Duration::from_secs(3),
        "dial took {:?}",
        started.elapsed()
    );
}

#[test]
#[ignore]
fn test_ftp_real_server() {
    let address = std::env::var("FTP_TEST_ADDRESS").unwrap_or_else(|_| "127.0.0.1:21".into());
    let login = std::env::var("FTP_TEST_USER").unwrap_or_else(|_| "anonymous".into());
    let password = std::env::var("FTP_TEST_PASSWORD").unwrap_or_default();

    let catalog = catalog();
    let partner = partner("ftp", &address, &[]);
    let account = account_with_password(&catalog, &login, &password);

    let mut client = new_client("ftp").unwrap();
    client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap();
    let files = client.list(&rule(""), "*").unwrap();
    println!("{} files", files.len());
    client.close().unwrap();
}

// ---------------------------------------------------------------------------
// WebDAV
// ---------------------------------------------------------------------------

fn multistatus(dir: &str, children: &[(&str, bool)]) -> String {
    let mut body = String::from(r#"<?xml version="1.0" encoding="utf-8"?><d:multistatus xmlns:d="DAV:">"#);
    let mut push = |href: &str, collection: bool| {
        let kind = if collection { "<d:collection/>" } else { "" };
        body.push_str(&format!(
            "<d:response><d:href>{}</d:href><d:propstat><d:prop><d:resourcetype>{}</d:resourcetype></d:prop></d:propstat></d:response>",
            href, kind
        ));
    };
    push(dir, true);
    for (name, collection) in children {
        push(&format!("{}{}", dir, name), *collection);
    }
    body.push_str("</d:multistatus>");
    body
}

struct DavRequest {
    method: String,
    path: String,
    depth: Option<String>,
    authorization: Option<String>,
}

fn read_dav_request(stream: &TcpStream) -> DavRequest {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).unwrap();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut depth = None;
    let mut authorization = None;
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim().to_string();
            match name.to_ascii_lowercase().as_str() {
                "depth" => depth = Some(value),
                "authorization" => authorization = Some(value),
                "content-length" => content_length = value.parse().unwrap_or(0),
                _ => {}
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).unwrap();

    DavRequest {
        method,
        path,
        depth,
        authorization,
    }
}

/// WebDAV server answering `requests` requests, one per connection
fn spawn_dav(expected_auth: String, requests: usize) -> (String, JoinHandle<Vec<(String, String, Option<String>)>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for _ in 0..requests {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_dav_request(&stream);
            seen.push((request.method.clone(), request.path.clone(), request.depth.clone()));

            let (status, body) = if request.authorization.as_deref() != Some(expected_auth.as_str()) {
                ("401 Unauthorized", String::new())
            } else {
                match request.path.as_str() {
                    "/" => ("207 Multi-Status", multistatus("/", &[("out/", true)])),
                    "/out/" => (
                        "207 Multi-Status",
                        multistatus(
                            "/out/",
                            &[
                                ("a.csv", false),
                                ("b.txt", false),
                                ("nested/", true),
                                (".hidden.csv", false),
                                ("report%202.csv", false),
                            ],
                        ),
                    ),
                    "/out/nested/" => ("207 Multi-Status", multistatus("/out/nested/", &[("c.csv", false)])),
                    _ => ("404 Not Found", String::new()),
                }
            };

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        }
        seen
    });

    (address, handle)
}

fn basic(login: &str, password: &str) -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", login, password))
    )
}

#[test]
fn test_webdav_list() {
    let (address, server) = spawn_dav(basic("alice", "dav-pw"), 3);
    let catalog = catalog();
    let partner = partner("webdav", &address, &[]);
    let account = account_with_password(&catalog, "alice", "dav-pw");

    let mut client = new_client("webdav").unwrap();
    client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap();

    let files = client.list(&rule("out"), "*.csv").unwrap();
    assert_eq!(files, vec!["a.csv".to_string(), "report 2.csv".to_string()]);

    let nested = client.list(&rule("out"), "nested/*.csv").unwrap();
    assert_eq!(nested, vec!["nested/c.csv".to_string()]);
    client.close().unwrap();

    let seen = server.join().unwrap();
    assert_eq!(seen[0], ("PROPFIND".to_string(), "/".to_string(), Some("0".to_string())));
    assert_eq!(seen[1], ("PROPFIND".to_string(), "/out/".to_string(), Some("1".to_string())));
}

#[test]
fn test_webdav_bad_credentials() {
    let (address, server) = spawn_dav(basic("alice", "dav-pw"), 1);
    let catalog = catalog();
    let partner = partner("webdav", &address, &[]);
    let account = account_with_password(&catalog, "alice", "nope");

    let mut client = new_client("webdav").unwrap();
    let err = client
        .connect(&ConnectTarget::new(&catalog, &partner, &account))
        .unwrap_err();

    assert!(matches!(err, ClientError::Authentication { .. }), "got {:?}", err);
    assert!(err.is_auth_error());
    server.join().unwrap();
}
