// Copyright (c) 2026 appujet, notdeltaxd and contributors
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

use vidcache::common::types::AnyResult;
use vidcache::configs::Config;
use vidcache::{common, Manager};

fn main() -> AnyResult<()> {
    let config = Config::load()?;
    common::logger::init(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git_commit = env!("GIT_COMMIT"),
        "vidcache starting"
    );

    let manager = Manager::init(&config)?;
    tracing::info!(port = manager.port(), "proxy ready");

    // The accept loop runs on its own thread; park the main thread until the
    // process is interrupted.
    loop {
        std::thread::park();
    }
}
