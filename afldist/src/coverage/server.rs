//! Static file server for the afl-cov web report.
//!
//! The socket is only bound once afl-cov has rendered the report's index
//! page. Until then the server just polls the file system.

use std::{
    fmt,
    fs::File,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::anyhow;
use percent_encoding::percent_decode_str;
use tiny_http::{Header, Request, Response, Server};

use crate::{
    config::CoverageConfig,
    constants::{REPORT_ARTIFACT, REPORT_SERVER_SCOPE},
    error::Result,
    events::{EventSink, Severity},
};

#[derive(Debug)]
pub struct ReportServer {
    web_dir: PathBuf,
    addr: String,
    poll_interval: Duration,
    sink: Arc<dyn EventSink>,
}

impl ReportServer {
    pub fn new(
        web_dir: PathBuf,
        addr: String,
        poll_interval: Duration,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        ReportServer {
            web_dir,
            addr,
            poll_interval,
            sink,
        }
    }

    pub fn from_config(config: &CoverageConfig, sink: Arc<dyn EventSink>) -> Self {
        ReportServer::new(
            config.web_dir(),
            config.listen_addr(),
            config.poll_interval,
            sink,
        )
    }

    /// The file whose existence signals that the report can be served.
    pub fn report_artifact(&self) -> PathBuf {
        self.web_dir.join(REPORT_ARTIFACT)
    }

    /// Block until the report artifact exists. There is no timeout.
    pub fn wait_for_report(&self) {
        let artifact = self.report_artifact();
        self.sink.emit(
            Severity::Info,
            REPORT_SERVER_SCOPE,
            &format!("Waiting for {}", artifact.display()),
        );
        while !artifact.is_file() {
            thread::sleep(self.poll_interval);
        }
    }

    pub fn bind(self) -> Result<BoundReportServer> {
        let server = Server::http(self.addr.as_str())
            .map_err(|err| anyhow!("Failed to bind report server to {}: {}", self.addr, err))?;
        self.sink.emit(
            Severity::Info,
            REPORT_SERVER_SCOPE,
            &format!(
                "Serving {} on http://{}",
                self.web_dir.display(),
                self.addr
            ),
        );
        Ok(BoundReportServer {
            server,
            web_dir: self.web_dir,
        })
    }

    /// Wait for the report, then serve it until the process is terminated.
    pub fn run(self) -> Result<()> {
        self.wait_for_report();
        self.bind()?.serve();
        Ok(())
    }
}

/// Resolution of a request path against the web directory.
#[derive(Debug, PartialEq, Eq)]
enum Lookup {
    Found(PathBuf),
    Forbidden,
    NotFound,
}

pub struct BoundReportServer {
    server: Server,
    web_dir: PathBuf,
}

impl fmt::Debug for BoundReportServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundReportServer")
            .field("addr", &self.local_addr())
            .field("web_dir", &self.web_dir)
            .finish()
    }
}

impl BoundReportServer {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Handle requests until the listener is shut down.
    pub fn serve(self) {
        for request in self.server.incoming_requests() {
            if let Err(err) = respond(&self.web_dir, request) {
                log::debug!(target: REPORT_SERVER_SCOPE, "Failed to send response: {}", err);
            }
        }
    }
}

fn respond(web_dir: &Path, request: Request) -> std::io::Result<()> {
    match lookup(web_dir, request.url()) {
        Lookup::Found(path) => match File::open(&path) {
            Ok(file) => {
                let mut response = Response::from_file(file);
                if let Ok(header) =
                    Header::from_bytes(&b"Content-Type"[..], content_type(&path).as_bytes())
                {
                    response.add_header(header);
                }
                request.respond(response)
            }
            Err(_) => request.respond(Response::from_string("Not Found").with_status_code(404)),
        },
        Lookup::Forbidden => {
            request.respond(Response::from_string("Forbidden").with_status_code(403))
        }
        Lookup::NotFound => {
            request.respond(Response::from_string("Not Found").with_status_code(404))
        }
    }
}

fn lookup(web_dir: &Path, url: &str) -> Lookup {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
    // Traversal is checked on the decoded path, so %2e%2e is rejected as well.
    let path = match percent_decode_str(path).decode_utf8() {
        Ok(path) => path,
        Err(_) => return Lookup::NotFound,
    };
    let relative = Path::new(path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Lookup::Forbidden;
    }

    let mut path = web_dir.join(relative);
    if path.is_dir() {
        path.push(REPORT_ARTIFACT);
    }
    if path.is_file() {
        Lookup::Found(path)
    } else {
        Lookup::NotFound
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("txt") | Some("info") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn test_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let web_dir = dir.path();
        fs::write(web_dir.join("index.html"), "<html/>").unwrap();
        fs::create_dir(web_dir.join("src")).unwrap();
        fs::write(web_dir.join("src/index.html"), "<html/>").unwrap();
        fs::write(web_dir.join("gcov.css"), "").unwrap();

        assert_eq!(lookup(web_dir, "/"), Lookup::Found(web_dir.join("index.html")));
        assert_eq!(
            lookup(web_dir, "/src/?sort=1"),
            Lookup::Found(web_dir.join("src/index.html"))
        );
        assert_eq!(lookup(web_dir, "/gcov.css"), Lookup::Found(web_dir.join("gcov.css")));
        assert_eq!(lookup(web_dir, "/missing.html"), Lookup::NotFound);
        assert_eq!(lookup(web_dir, "/../secret"), Lookup::Forbidden);
        assert_eq!(lookup(web_dir, "/src/../../secret"), Lookup::Forbidden);
    }

    #[test]
    fn test_lookup_decodes_escaped_paths() {
        let dir = tempfile::tempdir().unwrap();
        let web_dir = dir.path();
        fs::write(web_dir.join("my file.html"), "<html/>").unwrap();

        assert_eq!(
            lookup(web_dir, "/my%20file.html"),
            Lookup::Found(web_dir.join("my file.html"))
        );
        assert_eq!(lookup(web_dir, "/%2e%2e/secret"), Lookup::Forbidden);
        assert_eq!(lookup(web_dir, "/src/%2E%2E/%2e%2e/secret"), Lookup::Forbidden);
        assert_eq!(lookup(web_dir, "/%ff.html"), Lookup::NotFound);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("amber.png")), "image/png");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }
}
