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

mod support;

use std::os::unix::fs::PermissionsExt;

use support::{split_response, status_line, Server};

fn write_executable(path: &std::path::Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
    let mut perm = std::fs::metadata(path).unwrap().permissions();
    perm.set_mode(0o755);
    std::fs::set_permissions(path, perm).unwrap();
}

#[test]
fn classic_cgi_script_runs_and_streams_its_output() {
    let server = Server::spawn().unwrap();
    let script = server.root.join("greet.cgi");
    write_executable(
        &script,
        "#!/bin/sh\nprintf 'Content-Type: text/plain\\r\\n\\r\\nhello from cgi\\n'\n",
    );

    let raw = server.request("GET /greet.cgi HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, body) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 200 OK");
    assert!(head.to_ascii_lowercase().contains("content-type: text/plain"));
    assert_eq!(body, b"hello from cgi\n");
}

#[test]
fn classic_cgi_honors_explicit_status_header() {
    let server = Server::spawn().unwrap();
    let script = server.root.join("teapot.cgi");
    write_executable(&script, "#!/bin/sh\nprintf 'Status: 418 I am a teapot\\r\\n\\r\\n'\n");

    let raw = server.request("GET /teapot.cgi HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, _) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 418 Error");
    assert!(head.to_ascii_lowercase().contains("connection: close"));
}

#[test]
fn a_script_with_group_write_permission_is_served_as_static_not_executed() {
    let server = Server::spawn().unwrap();
    let script = server.root.join("sketchy.cgi");
    std::fs::write(&script, "#!/bin/sh\necho not executed\n").unwrap();
    let mut perm = std::fs::metadata(&script).unwrap().permissions();
    perm.set_mode(0o775); // group-writable, disqualifies it from CGI dispatch
    std::fs::set_permissions(&script, perm).unwrap();

    let raw = server.request("GET /sketchy.cgi HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, body) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 200 OK");
    assert_eq!(body, b"#!/bin/sh\necho not executed\n");
}

#[test]
fn path_info_is_split_from_script_name() {
    let server = Server::spawn().unwrap();
    let script = server.root.join("echo_path.cgi");
    write_executable(
        &script,
        "#!/bin/sh\nprintf 'Content-Type: text/plain\\r\\n\\r\\n%s\\n' \"$PATH_INFO\"\n",
    );

    let raw = server.request("GET /echo_path.cgi/extra/segments HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, body) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 200 OK");
    assert_eq!(body, b"/extra/segments\n");
}
