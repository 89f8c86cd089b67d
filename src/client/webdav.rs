//! WebDAV and WebDAVS client
//!
//! Directory reads are `PROPFIND` requests with `Depth: 1`; connect issues a
//! `Depth: 0` request on the root so bad credentials or TLS failures show up
//! at connect time rather than on the first listing.

use super::listing::{list_matching, DirLister, RemoteEntry};
use super::{ClientError, ClientResult, ConnectTarget, RemoteClient};
use crate::catalog::address::host_of;
use crate::catalog::{fetch_authorities, get_password, Rule};
use crate::context::TransferContext;
use crate::tls::{build_client_config, TlsVersion};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

pub const PROTOCOL_WEBDAV: &str = "webdav";
pub const PROTOCOL_WEBDAVS: &str = "webdavs";

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/></D:prop></D:propfind>"#;

/// WebDAV partner configuration (`protoConfig`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebdavPartnerConfig {
    #[serde(rename = "minTLSVersion", default)]
    pub min_tls_version: TlsVersion,
}

/// One `<response>` of a multistatus body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResource {
    /// Decoded path of the resource
    pub path: String,
    pub is_collection: bool,
}

/// Parse a `207 Multi-Status` body
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavResource>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut resources = Vec::new();
    let mut current: Option<DavResource> = None;
    let mut in_href = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"response" => {
                    current = Some(DavResource {
                        path: String::new(),
                        is_collection: false,
                    })
                }
                b"href" => in_href = true,
                b"collection" => {
                    if let Some(res) = current.as_mut() {
                        res.is_collection = true;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(res) = current.as_mut() {
                        res.is_collection = true;
                    }
                }
            }
            Event::Text(t) if in_href => {
                if let Some(res) = current.as_mut() {
                    res.path = href_path(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"href" => in_href = false,
                b"response" => resources.extend(current.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(resources)
}

/// Decoded path part of an href, which may be a full URL
fn href_path(href: &str) -> String {
    let raw = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    percent_decode_str(&raw).decode_utf8_lossy().into_owned()
}

fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

struct WebdavConnection {
    client: Client,
    base: Url,
    login: String,
    password: SecretString,
}

impl WebdavConnection {
    fn propfind(&self, url: Url, depth: &str) -> Result<Response, BoxError> {
        let method = Method::from_bytes(b"PROPFIND")?;
        let response = self
            .client
            .request(method, url)
            .header("Depth", depth)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .basic_auth(&self.login, Some(self.password.expose_secret()))
            .body(PROPFIND_BODY)
            .send()?;
        Ok(response)
    }

    fn url_for(&self, path: &str) -> Url {
        collection_url(&self.base, path)
    }
}

/// Characters escaped in a path segment; `%` included so names round-trip
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// URL of the collection at `path` on the partner
fn collection_url(base: &Url, path: &str) -> Url {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| utf8_percent_encode(s, PATH_SEGMENT).to_string())
        .collect();

    let mut url = base.clone();
    if segments.is_empty() {
        url.set_path("/");
    } else {
        url.set_path(&format!("/{}/", segments.join("/")));
    }
    url
}

/// WebDAV implementation of [`RemoteClient`]
pub struct WebdavClient {
    protocol: String,
    conn: Option<WebdavConnection>,
}

impl WebdavClient {
    pub fn new(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            conn: None,
        }
    }

    fn is_tls(&self) -> bool {
        self.protocol == PROTOCOL_WEBDAVS
    }
}

/// Base URL of a WebDAV partner
pub fn base_url(protocol: &str, address: &str) -> ClientResult<Url> {
    let scheme = if protocol == PROTOCOL_WEBDAVS {
        "https"
    } else {
        "http"
    };
    Url::parse(&format!("{}://{}/", scheme, address))
        .map_err(|e| ClientError::config(protocol, format!("invalid address '{}': {}", address, e)))
}

impl RemoteClient for WebdavClient {
    fn connect(&mut self, target: &ConnectTarget<'_>) -> ClientResult<()> {
        let ctx = TransferContext::<WebdavPartnerConfig>::resolve(
            target.catalog,
            target.partner,
            target.account,
        )?;
        let address = ctx.real_address.as_str();
        let base = base_url(&self.protocol, address)?;

        let mut builder = Client::builder();
        if self.is_tls() {
            let authorities =
                fetch_authorities(target.catalog).map_err(|source| ClientError::Catalog {
                    what: "TLS authorities".to_string(),
                    source,
                })?;
            let tls = build_client_config(
                host_of(address),
                ctx.proto_config.min_tls_version,
                &ctx.partner_creds,
                &ctx.account_creds,
                &authorities,
            )?;
            builder = builder.use_preconfigured_tls(tls);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        let conn = WebdavConnection {
            client,
            base,
            login: target.account.login.clone(),
            password: SecretString::from(
                get_password(&ctx.account_creds).unwrap_or_default().to_string(),
            ),
        };

        let response = conn
            .propfind(conn.url_for("/"), "0")
            .map_err(|e| ClientError::connection(&self.protocol, address, e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::error!(
                    "WebDAV authentication as {} on {} failed",
                    target.account.login,
                    target.partner.name
                );
                return Err(ClientError::auth(
                    &self.protocol,
                    format!("server answered {}", response.status()),
                ));
            }
            status if status.is_success() => {}
            status => {
                return Err(ClientError::connection(
                    &self.protocol,
                    address,
                    format!("unexpected response to PROPFIND: {}", status),
                ))
            }
        }

        tracing::info!(
            "Connected to {} partner {} as {}",
            self.protocol,
            target.partner.name,
            target.account.login
        );
        self.conn = Some(conn);
        Ok(())
    }

    fn list(&mut self, rule: &Rule, pattern: &str) -> ClientResult<Vec<String>> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| ClientError::not_connected(&self.protocol))?;
        list_matching(&mut WebdavLister(conn), rule, pattern)
    }

    fn close(&mut self) -> ClientResult<()> {
        self.conn = None;
        Ok(())
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }
}

struct WebdavLister<'a>(&'a WebdavConnection);

impl DirLister for WebdavLister<'_> {
    fn read_dir(&mut self, path: &str) -> ClientResult<Vec<RemoteEntry>> {
        let list_failed = |message: String| ClientError::ListFailed {
            path: path.to_string(),
            message,
        };

        let url = self.0.url_for(path);
        let response = self
            .0
            .propfind(url.clone(), "1")
            .map_err(|e| list_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(list_failed(format!("server answered {}", status)));
        }

        let body = response.text().map_err(|e| list_failed(e.to_string()))?;
        let resources = parse_multistatus(&body).map_err(|e| list_failed(e.to_string()))?;

        let dir = href_path(url.as_str());
        let dir = dir.trim_end_matches('/');

        Ok(resources
            .into_iter()
            .filter(|res| res.path.trim_end_matches('/') != dir)
            .map(|res| RemoteEntry {
                name: last_segment(&res.path).to_string(),
                is_dir: res.is_collection,
            })
            .filter(|entry| !entry.name.is_empty())
            .collect())
    }
}
