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

/// A SQTP request line carries CRLF-terminated headers like an HTTP
/// request, but with `SQTP-<VERB>` in place of a method.
fn sqtp_request(verb: &str, db_uri: &str, headers: &str, body: &str) -> String {
    format!(
        "SQTP-{verb} {db_uri} SQTP/1.0\r\n{headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[test]
fn create_insert_and_select_round_trip() {
    let server = Server::spawn().unwrap();

    let create = server
        .request(&sqtp_request(
            "CREATE",
            "/widgets.db/table",
            "NAME: widgets\r\nCOLUMN: id INTEGER PRIMARY KEY\r\nCOLUMN: label TEXT\r\n",
            "",
        ))
        .unwrap();
    let (head, _) = split_response(&create);
    assert_eq!(status_line(&head), "HTTP/1.1 201 Created");

    let insert = server
        .request(&sqtp_request(
            "INSERT",
            "/widgets.db",
            "TABLE: widgets\r\nCOLUMNS: id, label\r\n",
            "[1, \"sprocket\"]",
        ))
        .unwrap();
    let (head, body) = split_response(&insert);
    assert_eq!(status_line(&head), "HTTP/1.1 201 Created");
    assert!(String::from_utf8_lossy(&body).contains("\"inserted\":1"));

    let select = server
        .request(&sqtp_request("SELECT", "/widgets.db", "TABLE: widgets\r\n", ""))
        .unwrap();
    let (head, body) = split_response(&select);
    assert_eq!(status_line(&head), "HTTP/1.1 200 OK");
    let body = String::from_utf8_lossy(&body);
    assert!(body.contains("\"label\":\"sprocket\""));
}

#[test]
fn select_without_table_header_is_400() {
    let server = Server::spawn().unwrap();
    let raw = server.request(&sqtp_request("SELECT", "/", "", "")).unwrap();
    let (head, _) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 400 Bad Request");
}

#[test]
fn update_without_where_clause_is_rejected() {
    let server = Server::spawn().unwrap();
    server
        .request(&sqtp_request(
            "CREATE",
            "/prefs.db/table",
            "NAME: prefs\r\nCOLUMN: k TEXT\r\nCOLUMN: v TEXT\r\n",
            "",
        ))
        .unwrap();

    let raw = server
        .request(&sqtp_request("UPDATE", "/prefs.db", "TABLE: prefs\r\nCOLUMNS: v\r\n", "[\"x\"]"))
        .unwrap();
    let (head, body) = split_response(&raw);
    assert_eq!(status_line(&head), "HTTP/1.1 400 Bad Request");
    assert!(String::from_utf8_lossy(&body).contains("WHERE"));
}

#[test]
fn shared_memory_uri_is_usable_for_a_single_request_round_trip() {
    let server = Server::spawn().unwrap();
    let create = server
        .request(&sqtp_request(
            "CREATE",
            "/table",
            "NAME: scratch\r\nCOLUMN: v TEXT\r\n",
            "",
        ))
        .unwrap();
    let (head, _) = split_response(&create);
    assert_eq!(status_line(&head), "HTTP/1.1 201 Created");
}
