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

use support::{split_response, status_line, Server};

#[test]
fn serves_a_plain_static_file() {
    let server = Server::spawn().unwrap();
    std::fs::write(server.root.join("hello.html"), "<html>hi</html>").unwrap();

    let raw = server.request("GET /hello.html HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, body) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 200 OK");
    assert!(head.to_ascii_lowercase().contains("content-type: text/html"));
    assert_eq!(body, b"<html>hi</html>");
}

#[test]
fn missing_file_is_404() {
    let server = Server::spawn().unwrap();
    let raw = server.request("GET /nope.html HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, _) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 404 Not Found");
    assert!(head.to_ascii_lowercase().contains("connection: close"));
}

#[test]
fn directory_without_trailing_slash_redirects() {
    let server = Server::spawn().unwrap();
    std::fs::create_dir_all(server.root.join("sub")).unwrap();
    std::fs::write(server.root.join("sub/index.html"), "sub index").unwrap();

    let raw = server.request("GET /sub HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, _) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 301 Moved Permanently");
    assert!(head.contains("Location: /sub/"));
}

#[test]
fn directory_resolves_to_index_file() {
    let server = Server::spawn().unwrap();
    std::fs::create_dir_all(server.root.join("sub")).unwrap();
    std::fs::write(server.root.join("sub/index.html"), "sub index").unwrap();

    let raw = server.request("GET /sub/ HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, body) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 200 OK");
    assert_eq!(body, b"sub index");
}

#[test]
fn traversal_attempt_is_rejected() {
    let server = Server::spawn().unwrap();
    let raw = server.request("GET /../etc/passwd HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, _) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 404 Not Found");
}

#[test]
fn conditional_get_returns_304_on_matching_etag() {
    let server = Server::spawn().unwrap();
    std::fs::write(server.root.join("hello.html"), "<html>hi</html>").unwrap();

    let first = server.request("GET /hello.html HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, _) = split_response(&first);
    let etag = head
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("etag:"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim().to_string())
        .expect("response carries an ETag");

    let second = server
        .request(&format!("GET /hello.html HTTP/1.1\r\nIf-None-Match: {etag}\r\nConnection: close\r\n\r\n"))
        .unwrap();
    let (head2, body2) = split_response(&second);
    assert_eq!(status_line(&head2), "HTTP/1.1 304 Not Modified");
    assert!(body2.is_empty());
}

#[test]
fn range_request_returns_partial_content() {
    let server = Server::spawn().unwrap();
    std::fs::write(server.root.join("data.txt"), "0123456789").unwrap();

    let raw = server.request("GET /data.txt HTTP/1.1\r\nRange: bytes=2-5\r\nConnection: close\r\n\r\n").unwrap();
    let (head, body) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 206 Partial Content");
    assert!(head.contains("Content-Range: bytes 2-5/10"));
    assert_eq!(body, b"2345");
}

#[test]
fn head_request_carries_no_body() {
    let server = Server::spawn().unwrap();
    std::fs::write(server.root.join("hello.html"), "<html>hi</html>").unwrap();

    let raw = server.request("HEAD /hello.html HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, body) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 200 OK");
    assert!(body.is_empty());
}

#[test]
fn keep_alive_serves_multiple_requests_on_one_connection() {
    let server = Server::spawn().unwrap();
    std::fs::write(server.root.join("a.html"), "a").unwrap();
    std::fs::write(server.root.join("b.html"), "b").unwrap();

    let raw = server
        .request("GET /a.html HTTP/1.1\r\n\r\nGET /b.html HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let text = String::from_utf8_lossy(&raw);
    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(text.ends_with('b'));
}
