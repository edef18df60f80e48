// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The connection server (§4.6, §5): binds the listen port range, forks a
//! request handler per accepted connection, and caps live children at
//! `max-child`. Everything downstream of `accept` — request parsing,
//! resource resolution, static/CGI/SQTP dispatch, keep-alive — lives here
//! too, since the whole pipeline runs inside the forked child's single
//! thread (§5 "Scheduling model": one process per connection, no event
//! loop).
//!
//! Fd inventory carried across `fork` (§9 "fd-close loop"): the listening
//! socket is closed in each child immediately after `fork` (it has no
//! further use there), the accepted socket is the child's sole means of
//! talking to its client, VFS-backing fds are read-only and safe to
//! share, and the CGI/JIT-CGI backends open and close their own pipe and
//! grandchild fds. There is no wildcard fd-closing loop; every fd a child
//! doesn't want is closed individually and by name, not by range.

use std::{
    io::{BufRead, BufReader, ErrorKind, Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    os::unix::{fs::PermissionsExt, io::AsRawFd},
    path::{Path, PathBuf},
    sync::{atomic::Ordering, Arc},
};

use anyhow::{anyhow, Context};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::Config,
    consts,
    daemon::signals,
    http::{
        cgi, etag, mime, range,
        request::{Method, ParseOutcome, RequestContext, RequestKind},
        response, uri, vhost,
    },
    jit::JitEnvironment,
    user,
    vfs::BuiltinsVfs,
    Args,
};

/// Merged runtime configuration (CLI flags over TOML config over
/// built-in defaults), per SPEC_FULL.md's "Configuration" ambient-stack
/// section.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_low: u16,
    pub listen_high: u16,
    pub tls_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub root: PathBuf,
    pub default_vhost: String,
    pub abuse_dir: Option<PathBuf>,
    pub max_age: u64,
    pub cpu_seconds: Option<u64>,
    pub max_child: usize,
    pub no_timeout: bool,
    pub user: Option<String>,
    pub chroot: bool,
    pub localhost: bool,
    pub start_page: Option<String>,
    pub pid_file: String,
}

impl ServerConfig {
    /// CLI flags win over the TOML config wherever both are present; an
    /// absent value on both sides falls back to the built-in default.
    pub fn merge(config: Config, args: &Args) -> ServerConfig {
        ServerConfig {
            listen_low: args.listen_low.or(config.listen_low).unwrap_or(8080),
            listen_high: args.listen_high.or(config.listen_high).unwrap_or(8090),
            tls_port: args.tls_port.or(config.tls_port),
            tls_cert: args.tls_cert.clone().or(config.tls_cert),
            tls_key: args.tls_key.clone().or(config.tls_key),
            root: PathBuf::from(args.root.clone().or(config.root).unwrap_or_else(|| ".".to_string())),
            default_vhost: args
                .default_vhost
                .clone()
                .or(config.default_vhost)
                .unwrap_or_else(|| "default.website".to_string()),
            abuse_dir: args.abuse_dir.clone().or(config.abuse_dir).map(PathBuf::from),
            max_age: args.max_age.or(config.max_age).unwrap_or(3600),
            cpu_seconds: args.cpu_seconds.or(config.cpu_seconds),
            max_child: args.max_child.or(config.max_child).unwrap_or(consts::DEFAULT_MAX_CHILD),
            no_timeout: args.no_timeout || config.no_timeout.unwrap_or(false),
            user: args.user.clone().or(config.user),
            chroot: args.chroot || config.chroot.unwrap_or(false),
            localhost: args.localhost || config.localhost_only.unwrap_or(false),
            start_page: args.page.clone().or(config.start_page),
            pid_file: args
                .pid_file
                .clone()
                .or(config.pid_file)
                .unwrap_or_else(|| consts::DEFAULT_PID_FILE.to_string()),
        }
    }
}

/// The bound listener plus the per-process state every forked request
/// handler inherits read-only: the built-ins VFS and the pre-configured
/// JIT environment (§4.5 "Isolation").
pub struct Server {
    pub config: ServerConfig,
    vfs: Arc<BuiltinsVfs>,
    jit: Arc<JitEnvironment>,
    listener: TcpListener,
    port: u16,
}

impl Server {
    /// Binds the first free port in `[listen_low, listen_high]`, builds the
    /// VFS and JIT environment once (before any `fork`, so every child
    /// inherits them ready-made), applies chroot/privilege-drop if
    /// requested, and writes the pidfile (§4.6).
    #[instrument(skip_all)]
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let vfs = Arc::new(BuiltinsVfs::new());
        let jit = Arc::new(JitEnvironment::new(Arc::clone(&vfs)).context("setting up JIT environment")?);

        let bind_addr = if config.localhost { Ipv4Addr::LOCALHOST } else { Ipv4Addr::UNSPECIFIED };
        let mut bound = None;
        for port in config.listen_low..=config.listen_high {
            match TcpListener::bind((bind_addr, port)) {
                Ok(listener) => {
                    bound = Some((listener, port));
                    break;
                }
                Err(e) => debug!("port {port} unavailable: {e}"),
            }
        }
        let (listener, port) = bound
            .ok_or_else(|| anyhow!("no free port in [{}, {}]", config.listen_low, config.listen_high))?;

        if config.chroot {
            let root = config.root.to_str().ok_or_else(|| anyhow!("--root is not valid UTF-8"))?;
            user::chroot_into(root).context("chroot into document root")?;
        }
        if let Some(name) = &config.user {
            let info = user::info_by_name(name)?;
            user::drop_privileges(info.uid, info.gid).context("dropping privileges")?;
        }

        crate::daemon::write_pidfile(&config.pid_file, std::process::id() as i32, port)?;
        info!("listening on port {port}, root {}", config.root.display());

        Ok(Server { config, vfs, jit, listener, port })
    }

    /// The accept loop (§4.6, §5): forks a request-handler child per
    /// connection, reaps zombies non-blockingly every iteration, and blocks
    /// on `wait` to free a slot once `max_child` live children are
    /// outstanding. Returns once the listener shutdown flag (set by a
    /// caught `SIGTERM`/`SIGINT`, §4.6 "Graceful stop") is observed.
    #[instrument(skip_all)]
    pub fn serve(&self) -> anyhow::Result<()> {
        let shutdown = signals::install_listener_shutdown_flag()?;
        let listener_fd = self.listener.as_raw_fd();
        let mut live_children: Vec<libc::pid_t> = Vec::new();

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, leaving accept loop");
                break;
            }

            reap_zombies(&mut live_children);
            if live_children.len() >= self.config.max_child {
                reap_one_blocking(&mut live_children);
                continue;
            }

            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };

            match unsafe { nix::unistd::fork() }.context("forking request handler")? {
                nix::unistd::ForkResult::Child => {
                    unsafe { libc::close(listener_fd) };
                    let code = self.handle_connection(stream, peer);
                    std::process::exit(code);
                }
                nix::unistd::ForkResult::Parent { child } => {
                    live_children.push(child.as_raw());
                    drop(stream);
                }
            }
        }
        Ok(())
    }

    /// Runs the full keep-alive request loop for one accepted connection,
    /// inside the forked child (§4.4 "Per-request state machine", §4.6
    /// Keep-alive). Returns the process exit code.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> i32 {
        if signals::install_request_signal_handlers(libc::STDERR_FILENO).is_err() {
            warn!("failed to install per-request signal handlers");
        }

        if self.is_shunned(&peer) {
            info!("refusing shunned peer {peer}");
            return 0;
        }

        let mut writer = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                error!("cloning connection stream: {e}");
                return 1;
            }
        };
        let mut reader = BufReader::new(stream);

        let mut requests_served: u32 = 0;
        loop {
            if !self.config.no_timeout {
                let budget =
                    if requests_served == 0 { consts::FIRST_REQUEST_HEADER_TIMEOUT } else { consts::SUBSEQUENT_HEADER_TIMEOUT };
                signals::schedule_alarm(budget.as_secs() as u32);
            }

            let head = match read_request_head(&mut reader) {
                Ok(Some(head)) => head,
                Ok(None) => break, // client closed the connection
                Err(e) => {
                    debug!("malformed request head from {peer}: {e}");
                    let _ = response::send_error(&mut writer, 400);
                    break;
                }
            };
            signals::schedule_alarm(0);

            let ctx = match RequestContext::parse(&head.request_line, &head.header_lines, peer) {
                ParseOutcome::Ok(ctx) => ctx,
                ParseOutcome::Reject(status) => {
                    let _ = response::send_error(&mut writer, status);
                    break;
                }
            };

            if !self.config.no_timeout {
                match ctx.content_length() {
                    Some(len) => signals::schedule_alarm(consts::post_body_timeout(len).as_secs() as u32),
                    None => signals::schedule_alarm(consts::OVERALL_DECODE_TIMEOUT.as_secs() as u32),
                }
            }

            let body = match read_body(&mut reader, ctx.content_length()) {
                Ok(body) => body,
                Err(e) => {
                    debug!("failed reading request body from {peer}: {e}");
                    let _ = response::send_error(&mut writer, 400);
                    break;
                }
            };
            signals::schedule_alarm(0);

            requests_served += 1;
            let keep_alive = ctx.wants_keep_alive() && requests_served < consts::MAX_REQUESTS_PER_CONNECTION;

            if !self.config.no_timeout {
                signals::schedule_alarm(consts::STATIC_SEND_BASE_TIMEOUT.as_secs() as u32);
            }
            let status = self.dispatch(&mut writer, &ctx, &body, keep_alive);
            signals::schedule_alarm(0);

            if !keep_alive || status >= 400 {
                break;
            }
        }
        0
    }

    /// Resolves the request's resource and dispatches to the matching
    /// backend, writing a complete response. Returns the status code sent,
    /// so the caller can enforce "4xx/5xx forces close" (§4.3, §4.4).
    #[instrument(skip_all, fields(path = %ctx.path))]
    fn dispatch(&self, w: &mut TcpStream, ctx: &RequestContext, body: &[u8], keep_alive: bool) -> u16 {
        if let RequestKind::Sqtp(verb) = ctx.kind {
            return self.dispatch_sqtp(w, verb, ctx, body, keep_alive);
        }

        let vhost_dir = vhost::resolve_dir(&self.config.root, ctx.host(), &self.config.default_vhost);
        match self.resolve(&vhost_dir, &ctx.path) {
            Resolved::Redirect(status, location) => {
                let _ = response::send_redirect(w, status, &location, keep_alive);
                status
            }
            Resolved::NotFound => {
                if uri::is_forbidden(&ctx.path) {
                    self.mark_shunned(&ctx.peer);
                }
                let _ = response::send_error(w, 404);
                404
            }
            Resolved::File { source, script_name, path_info } => {
                self.serve_resolved_file(w, ctx, body, keep_alive, source, &script_name, &path_info)
            }
        }
    }

    /// Builds `SqtpHeaders` from the already-parsed request headers and
    /// derives `(db_uri, object_path)` from the request path. CREATE/DROP/
    /// ALTER take the object kind from the URI's trailing `table`/`index`/
    /// `trigger` segment (§4.3), so for those three verbs the database URI
    /// is the path with that segment stripped, while `object_path` keeps
    /// the full path so `sqtp::dispatch`'s own last-segment lookup still
    /// finds the kind word.
    fn dispatch_sqtp(
        &self,
        w: &mut TcpStream,
        verb: wpp_protocol::SqtpVerb,
        ctx: &RequestContext,
        body: &[u8],
        keep_alive: bool,
    ) -> u16 {
        use wpp_protocol::SqtpVerb;

        let mut headers = wpp_protocol::SqtpHeaders::default();
        for (name, value) in ctx.headers.iter() {
            headers.apply_line(&format!("{name}: {value}"));
        }

        let (db_path, object_path) = match verb {
            SqtpVerb::Create | SqtpVerb::Drop | SqtpVerb::Alter => match ctx.path.rsplit_once('/') {
                Some((rest, "table" | "index" | "trigger")) => {
                    let rest = if rest.is_empty() { "/" } else { rest };
                    (rest.to_string(), ctx.path.clone())
                }
                _ => (ctx.path.clone(), ctx.path.clone()),
            },
            _ => (ctx.path.clone(), ctx.path.clone()),
        };
        let db_uri = wpp_protocol::DatabaseUri::parse(&db_path);

        let resp = crate::sqtp::dispatch(verb, &db_uri, &object_path, &headers, body);
        let keep_alive = keep_alive && resp.status < 400;
        let mut extra: Vec<(&str, String)> =
            vec![("Content-Type", resp.content_type.to_string()), ("Content-Length", resp.body.len().to_string())];
        if resp.status < 400 {
            extra.push(("X-SQTP-Protocol", wpp_protocol::SQTP_PROTOCOL_VERSION.to_string()));
        }
        for (name, value) in &resp.extra_headers {
            extra.push((name.as_str(), value.clone()));
        }
        let status = resp.status;
        if response::write_head(w, status, &extra, keep_alive).is_ok() {
            let _ = w.write_all(&resp.body);
        }
        status
    }

    /// Walks `raw_path` segment by segment against the VFS and the real
    /// filesystem, implementing the three outcomes of §4.4 "Resource
    /// resolution".
    fn resolve(&self, vhost_dir: &Path, raw_path: &str) -> Resolved {
        let segments: Vec<&str> = raw_path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        let mut consumed = String::new();
        for (i, seg) in segments.iter().enumerate() {
            consumed.push('/');
            consumed.push_str(seg);
            match self.lookup(vhost_dir, &consumed) {
                Lookup::File(source) => {
                    let path_info: String = segments[i + 1..].iter().map(|s| format!("/{s}")).collect();
                    return Resolved::File { source, script_name: consumed, path_info };
                }
                Lookup::Dir => {
                    if i == segments.len() - 1 {
                        return self.resolve_directory(vhost_dir, &consumed, raw_path);
                    }
                }
                Lookup::Missing => return self.not_found_fallback(vhost_dir, &segments[..i]),
            }
        }
        self.resolve_directory(vhost_dir, "", raw_path)
    }

    fn lookup(&self, vhost_dir: &Path, uri_path: &str) -> Lookup {
        if let Some(entry) = self.vfs.find(uri_path) {
            return if entry.is_dir() { Lookup::Dir } else { Lookup::File(FileSource::Vfs(uri_path.to_string())) };
        }
        let disk_path = self.disk_path(vhost_dir, uri_path);
        match std::fs::metadata(&disk_path) {
            Ok(meta) if meta.is_dir() => Lookup::Dir,
            Ok(_) => Lookup::File(FileSource::Disk(disk_path)),
            Err(_) => Lookup::Missing,
        }
    }

    fn disk_path(&self, vhost_dir: &Path, uri_path: &str) -> PathBuf {
        let rel = uri_path.trim_start_matches('/');
        if rel.is_empty() {
            vhost_dir.to_path_buf()
        } else {
            vhost_dir.join(rel)
        }
    }

    /// §4.4 outcome 2: a directory was reached at the URI end. Redirects
    /// to the trailing-slash form first if the original URI lacked one,
    /// then tries the default index names in order.
    fn resolve_directory(&self, vhost_dir: &Path, dir_uri: &str, raw_path: &str) -> Resolved {
        if raw_path != "/" && !raw_path.ends_with('/') {
            return Resolved::Redirect(301, format!("{raw_path}/"));
        }
        for name in consts::INDEX_NAMES {
            let candidate = format!("{dir_uri}/{name}");
            if let Lookup::File(source) = self.lookup(vhost_dir, &candidate) {
                return Resolved::File { source, script_name: candidate, path_info: String::new() };
            }
        }
        Resolved::NotFound
    }

    /// §4.4 outcome 3: a segment did not resolve at all. Walks back toward
    /// the root trying `<dir>/not-found.html`, redirecting (302) to the
    /// first hit.
    fn not_found_fallback(&self, vhost_dir: &Path, resolved_segments: &[&str]) -> Resolved {
        for i in (0..=resolved_segments.len()).rev() {
            let dir_uri: String = resolved_segments[..i].iter().map(|s| format!("/{s}")).collect();
            let candidate = format!("{dir_uri}/{}", consts::NOT_FOUND_NAME);
            if let Lookup::File(_) = self.lookup(vhost_dir, &candidate) {
                return Resolved::Redirect(302, candidate);
            }
        }
        Resolved::NotFound
    }

    /// Dispatch policy on a resolved file (§4.4 "Dispatch policy"): `.c` is
    /// C-CGI, an executable-and-safe-permission file is classic CGI,
    /// `.scgi` is SCGI, everything else is static.
    fn serve_resolved_file(
        &self,
        w: &mut TcpStream,
        ctx: &RequestContext,
        body: &[u8],
        keep_alive: bool,
        source: FileSource,
        script_name: &str,
        path_info: &str,
    ) -> u16 {
        match &source {
            FileSource::Disk(path) if path.extension().and_then(|e| e.to_str()) == Some("c") => {
                self.run_c_cgi_from_disk(w, ctx, path, script_name, keep_alive)
            }
            FileSource::Vfs(vfs_uri) if vfs_uri.ends_with(".c") => {
                self.run_c_cgi_from_vfs(w, ctx, vfs_uri, script_name, keep_alive)
            }
            FileSource::Disk(path) if path.extension().and_then(|e| e.to_str()) == Some("scgi") => {
                self.run_scgi(w, ctx, path, script_name, path_info, body, keep_alive)
            }
            FileSource::Disk(path) if is_classic_cgi_candidate(path) => {
                self.run_classic_cgi(w, ctx, path, script_name, path_info, body, keep_alive)
            }
            _ => self.serve_static(w, ctx, source, keep_alive),
        }
    }

    fn run_c_cgi_from_disk(&self, w: &mut TcpStream, ctx: &RequestContext, path: &Path, script_name: &str, keep_alive: bool) -> u16 {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                error!("reading C-CGI source {}: {e}", path.display());
                let _ = response::send_error(w, 500);
                return 500;
            }
        };
        self.run_c_cgi(w, ctx, &source, script_name, keep_alive)
    }

    fn run_c_cgi_from_vfs(&self, w: &mut TcpStream, ctx: &RequestContext, vfs_uri: &str, script_name: &str, keep_alive: bool) -> u16 {
        let entry = match self.vfs.find(vfs_uri) {
            Some(e) => e,
            None => {
                let _ = response::send_error(w, 404);
                return 404;
            }
        };
        let bytes = match entry.decompressed() {
            Ok(b) => b,
            Err(e) => {
                error!("decompressing built-in C-CGI source {vfs_uri}: {e}");
                let _ = response::send_error(w, 500);
                return 500;
            }
        };
        let source = String::from_utf8_lossy(&bytes).into_owned();
        self.run_c_cgi(w, ctx, &source, script_name, keep_alive)
    }

    fn run_c_cgi(&self, w: &mut TcpStream, ctx: &RequestContext, source: &str, script_name: &str, keep_alive: bool) -> u16 {
        match cgi::run_c_cgi(&self.jit, source, &ctx.raw_uri) {
            Ok((_code, raw)) => self.send_cgi_output(w, &raw, keep_alive),
            Err(e) => {
                error!("C-CGI run failed for {script_name}: {e}");
                let _ = response::send_error(w, 500);
                500
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_classic_cgi(
        &self,
        w: &mut TcpStream,
        ctx: &RequestContext,
        path: &Path,
        script_name: &str,
        path_info: &str,
        body: &[u8],
        keep_alive: bool,
    ) -> u16 {
        let env = cgi::build_env(ctx, path, script_name, path_info, self.port);
        match cgi::run_classic(path, &env, body, self.config.cpu_seconds) {
            Ok(raw) => self.send_cgi_output(w, &raw, keep_alive),
            Err(e) => {
                error!("classic CGI run failed for {}: {e}", path.display());
                let _ = response::send_error(w, 500);
                500
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_scgi(
        &self,
        w: &mut TcpStream,
        ctx: &RequestContext,
        scgi_file: &Path,
        script_name: &str,
        path_info: &str,
        body: &[u8],
        keep_alive: bool,
    ) -> u16 {
        let env = cgi::build_env(ctx, scgi_file, script_name, path_info, self.port);
        match cgi::run_scgi(scgi_file, &env, body) {
            Ok(raw) => self.send_cgi_output(w, &raw, keep_alive),
            Err(e) => {
                error!("SCGI backend failed for {}: {e}", scgi_file.display());
                let _ = response::send_error(w, 500);
                500
            }
        }
    }

    fn send_cgi_output(&self, w: &mut TcpStream, raw: &[u8], keep_alive: bool) -> u16 {
        let (status, headers, cgi_body) = cgi::parse_cgi_output(raw);
        let keep_alive = keep_alive && status < 400;
        let mut extra: Vec<(&str, String)> = headers.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-length")) {
            extra.push(("Content-Length", cgi_body.len().to_string()));
        }
        if response::write_head(w, status, &extra, keep_alive).is_ok() {
            let _ = w.write_all(cgi_body);
        }
        status
    }

    /// Serves a static resource: conditional GET (ETag/If-Modified-Since),
    /// gzip/br sibling passthrough, byte ranges, and VFS compressed-blob
    /// direct send (§4.4 "Caching", "Range handling", "Dispatch policy").
    fn serve_static(&self, w: &mut TcpStream, ctx: &RequestContext, source: FileSource, keep_alive: bool) -> u16 {
        match source {
            FileSource::Disk(path) => self.serve_static_disk(w, ctx, &path, keep_alive),
            FileSource::Vfs(uri) => self.serve_static_vfs(w, ctx, &uri, keep_alive),
        }
    }

    fn serve_static_disk(&self, w: &mut TcpStream, ctx: &RequestContext, path: &Path, keep_alive: bool) -> u16 {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => {
                let _ = response::send_error(w, 404);
                return 404;
            }
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let etag_value = etag::for_file(mtime, meta.len());

        if let Some(status) = self.conditional_not_modified(ctx, &etag_value, mtime) {
            let _ = response::write_head(w, status, &[], keep_alive);
            return status;
        }

        let (encoded_path, content_encoding) = sibling_encoded_path(path, ctx);
        let send_path = encoded_path.as_deref().unwrap_or(path);
        let bytes = match std::fs::read(send_path) {
            Ok(b) => b,
            Err(e) => {
                error!("reading static file {}: {e}", send_path.display());
                let _ = response::send_error(w, 500);
                return 500;
            }
        };

        self.send_static_bytes(w, ctx, &bytes, path, &etag_value, content_encoding, keep_alive)
    }

    fn serve_static_vfs(&self, w: &mut TcpStream, ctx: &RequestContext, uri_path: &str, keep_alive: bool) -> u16 {
        let entry = match self.vfs.find(uri_path) {
            Some(e) => e,
            None => {
                let _ = response::send_error(w, 404);
                return 404;
            }
        };
        let etag_value = etag::for_builtin(entry.hash, entry.orig_len());

        if let Some(status) = self.conditional_not_modified(ctx, &etag_value, 0) {
            let _ = response::write_head(w, status, &[], keep_alive);
            return status;
        }

        let wants_gzip = ctx.headers.get("accept-encoding").map(|v| v.contains("gzip")).unwrap_or(false);
        let wants_range = ctx.headers.get("range").is_some();
        if wants_gzip && !wants_range {
            let compressed = entry.compressed();
            let mime_type = mime::lookup(uri_path);
            let headers = [
                ("Content-Type", mime_type.to_string()),
                ("Content-Length", compressed.len().to_string()),
                ("Content-Encoding", "gzip".to_string()),
                ("ETag", etag_value.clone()),
                ("Cache-Control", format!("max-age={}", self.config.max_age)),
            ];
            if response::write_head(w, 200, &headers, keep_alive).is_ok() {
                let _ = w.write_all(compressed);
            }
            return 200;
        }

        let bytes = match entry.decompressed() {
            Ok(b) => b,
            Err(e) => {
                error!("decompressing built-in {uri_path}: {e}");
                let _ = response::send_error(w, 500);
                return 500;
            }
        };
        self.send_static_bytes(w, ctx, &bytes, Path::new(uri_path), &etag_value, None, keep_alive)
    }

    /// Returns `Some(304)` when `If-None-Match`/`If-Modified-Since` say the
    /// client's cached copy is still valid.
    fn conditional_not_modified(&self, ctx: &RequestContext, etag_value: &str, mtime: u64) -> Option<u16> {
        if let Some(candidate) = ctx.headers.get("if-none-match") {
            if etag::matches(candidate, etag_value) {
                return Some(304);
            }
        }
        if let Some(since) = ctx.headers.get("if-modified-since") {
            if let Ok(since_secs) = chrono::DateTime::parse_from_rfc2822(since) {
                if mtime > 0 && (since_secs.timestamp() as u64) >= mtime {
                    return Some(304);
                }
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn send_static_bytes(
        &self,
        w: &mut TcpStream,
        ctx: &RequestContext,
        bytes: &[u8],
        name_for_mime: &Path,
        etag_value: &str,
        content_encoding: Option<&'static str>,
        keep_alive: bool,
    ) -> u16 {
        let mime_type = mime::lookup(&name_for_mime.to_string_lossy());
        let total_len = bytes.len() as u64;

        let byte_range = ctx.headers.get("range").and_then(|h| range::parse(h, total_len));
        let (status, slice) = match byte_range {
            Some(r) => (206, &bytes[r.start as usize..=r.end as usize]),
            None => (200, bytes),
        };

        let mut headers = vec![
            ("Content-Type".to_string(), mime_type.to_string()),
            ("Content-Length".to_string(), slice.len().to_string()),
            ("ETag".to_string(), etag_value.to_string()),
            ("Cache-Control".to_string(), format!("max-age={}", self.config.max_age)),
        ];
        if let Some(encoding) = content_encoding {
            headers.push(("Content-Encoding".to_string(), encoding.to_string()));
        }
        if let Some(r) = byte_range {
            headers.push(("Content-Range".to_string(), r.content_range_header(total_len)));
        }
        let header_refs: Vec<(&str, String)> = headers.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

        if matches!(ctx.kind, RequestKind::Http(Method::Head)) {
            let _ = response::write_head(w, status, &header_refs, keep_alive);
            return status;
        }
        if response::write_head(w, status, &header_refs, keep_alive).is_ok() {
            let _ = w.write_all(slice);
        }
        status
    }

    fn is_shunned(&self, peer: &SocketAddr) -> bool {
        match &self.config.abuse_dir {
            Some(dir) => dir.join(peer.ip().to_string()).exists(),
            None => false,
        }
    }

    /// Marks `peer` for shunning by creating an empty marker file, per the
    /// abuse-heuristic convention recorded in DESIGN.md: zero-byte marker
    /// means a permanent ban, no TTL comparison.
    fn mark_shunned(&self, peer: &SocketAddr) {
        if let Some(dir) = &self.config.abuse_dir {
            let marker = dir.join(peer.ip().to_string());
            if let Err(e) = std::fs::OpenOptions::new().create(true).write(true).open(&marker) {
                warn!("failed to write abuse marker {}: {e}", marker.display());
            }
        }
    }
}

enum Lookup {
    File(FileSource),
    Dir,
    Missing,
}

#[derive(Clone)]
enum FileSource {
    Disk(PathBuf),
    Vfs(String),
}

enum Resolved {
    Redirect(u16, String),
    NotFound,
    File { source: FileSource, script_name: String, path_info: String },
}

/// True for files that are executable and carry no group/other write bit —
/// the "safe to exec as CGI" test from §4.4 "Dispatch policy".
fn is_classic_cgi_candidate(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str());
    if matches!(ext, Some("c") | Some("scgi")) {
        return false;
    }
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mode = meta.permissions().mode();
            mode & 0o111 != 0 && mode & 0o022 == 0
        }
        Err(_) => false,
    }
}

/// If the client accepts gzip/br and a sibling `.gz`/`.br` file exists next
/// to `path`, returns it along with the matching `Content-Encoding`
/// (§4.4 "Dispatch policy" static passthrough). A `Range` request disables
/// passthrough since the encoded sibling has a different byte layout.
fn sibling_encoded_path(path: &Path, ctx: &RequestContext) -> (Option<PathBuf>, Option<&'static str>) {
    if ctx.headers.get("range").is_some() {
        return (None, None);
    }
    let accept_encoding = ctx.headers.get("accept-encoding").unwrap_or("");
    if accept_encoding.contains("gzip") {
        let candidate = append_extension(path, "gz");
        if candidate.is_file() {
            return (Some(candidate), Some("gzip"));
        }
    }
    if accept_encoding.contains("br") {
        let candidate = append_extension(path, "br");
        if candidate.is_file() {
            return (Some(candidate), Some("br"));
        }
    }
    (None, None)
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

struct RequestHead {
    request_line: String,
    header_lines: Vec<String>,
}

/// Reads one request's request-line plus header block, stopping at the
/// first blank line. Returns `Ok(None)` on a clean EOF before any bytes of
/// a new request arrive (the normal way a keep-alive connection ends).
fn read_request_head(reader: &mut impl BufRead) -> anyhow::Result<Option<RequestHead>> {
    let Some(mut request_line) = read_line(reader)? else { return Ok(None) };
    // Tolerate a stray blank line between pipelined requests (RFC 7230 §3.5).
    if request_line.is_empty() {
        let Some(line) = read_line(reader)? else { return Ok(None) };
        request_line = line;
    }

    let mut header_lines = Vec::new();
    loop {
        match read_line(reader)? {
            Some(line) if line.is_empty() => break,
            Some(line) => header_lines.push(line),
            None => anyhow::bail!("connection closed mid-headers"),
        }
    }
    Ok(Some(RequestHead { request_line, header_lines }))
}

fn read_line(reader: &mut impl BufRead) -> anyhow::Result<Option<String>> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).context("reading line")?;
    if n == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn read_body(reader: &mut impl Read, content_length: Option<u64>) -> anyhow::Result<Vec<u8>> {
    let Some(len) = content_length else { return Ok(Vec::new()) };
    if len > consts::MAX_CONTENT_LENGTH {
        anyhow::bail!("Content-Length {len} exceeds maximum {}", consts::MAX_CONTENT_LENGTH);
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).context("reading request body")?;
    Ok(buf)
}

/// Reaps every child that has already exited, without blocking (§4.6
/// "Zombie reaping is non-blocking via `waitpid(0, NULL, WNOHANG)`").
fn reap_zombies(live: &mut Vec<libc::pid_t>) {
    loop {
        let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        live.retain(|&p| p != pid);
    }
}

/// Blocks on any child to reap a slot once `max_child` is saturated.
fn reap_one_blocking(live: &mut Vec<libc::pid_t>) {
    let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), 0) };
    if pid > 0 {
        live.retain(|&p| p != pid);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args() -> Args {
        use clap::Parser;
        Args::parse_from(["wpp"])
    }

    #[test]
    fn merge_prefers_cli_over_config_defaults_otherwise() {
        let mut a = args();
        a.max_child = Some(7);
        let config = Config { max_child: Some(42), chroot: Some(true), ..Config::default() };
        let merged = ServerConfig::merge(config, &a);
        assert_eq!(merged.max_child, 7);
        assert!(merged.chroot);
        assert_eq!(merged.listen_low, 8080);
    }

    #[test]
    fn merge_falls_back_to_config_when_cli_absent() {
        let a = args();
        let config = Config { max_child: Some(42), ..Config::default() };
        let merged = ServerConfig::merge(config, &a);
        assert_eq!(merged.max_child, 42);
    }

    #[test]
    fn merge_bridges_mismatched_field_names() {
        let a = args();
        let config = Config { localhost_only: Some(true), start_page: Some("/welcome.html".to_string()), ..Config::default() };
        let merged = ServerConfig::merge(config, &a);
        assert!(merged.localhost);
        assert_eq!(merged.start_page.as_deref(), Some("/welcome.html"));
    }

    #[test]
    fn classic_cgi_requires_exec_bit_and_no_group_other_write() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.cgi");
        std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        let mut perm = std::fs::metadata(&script).unwrap().permissions();
        perm.set_mode(0o755);
        std::fs::set_permissions(&script, perm).unwrap();
        assert!(is_classic_cgi_candidate(&script));

        let mut perm = std::fs::metadata(&script).unwrap().permissions();
        perm.set_mode(0o757);
        std::fs::set_permissions(&script, perm).unwrap();
        assert!(!is_classic_cgi_candidate(&script));
    }

    #[test]
    fn append_extension_preserves_original_name() {
        assert_eq!(append_extension(Path::new("/a/b.html"), "gz"), PathBuf::from("/a/b.html.gz"));
    }

    #[test]
    fn create_table_uri_strips_trailing_object_segment() {
        let path = "/mydb.db/widgets/table";
        let (rest, kind) = path.rsplit_once('/').unwrap();
        assert_eq!(rest, "/mydb.db/widgets");
        assert_eq!(kind, "table");
    }

    #[test]
    fn create_table_at_root_maps_to_shared_memory_db() {
        let path = "/table";
        let (rest, kind) = path.rsplit_once('/').unwrap();
        assert_eq!(rest, "");
        assert_eq!(kind, "table");
        // dispatch_sqtp maps an empty `rest` to "/" (DatabaseUri::SharedMemory).
    }
}
