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
/// wpp is a small self-contained HTTP server that hosts static files,
/// classic/C-CGI scripts and a SQL-over-HTTP protocol (SQTP) behind one
/// listener.
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = wpp_core::Args::parse();
    ExitCode::from(wpp_core::run(args) as u8)
}
