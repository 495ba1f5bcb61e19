//
// Copyright 2016 The Cartographer Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;

error_chain! {
    foreign_links {
        Io(io::Error);
        Json(serde_json::Error);
    }

    errors {
        InputFormat(detail: String) {
            description("malformed point batch from a reader")
            display("malformed point batch: {}", detail)
        }

        Capacity(detail: String) {
            description("ran out of storage capacity")
            display("ran out of storage capacity: {}", detail)
        }

        InternalInvariant(node: String, detail: String) {
            description("an internal invariant was violated")
            display("internal invariant violated at node {:?}: {}", node, detail)
        }

        WorkerCrash(detail: String) {
            description("a worker task panicked")
            display("worker crashed: {}", detail)
        }

        ConfigError(detail: String) {
            description("invalid build configuration")
            display("invalid configuration: {}", detail)
        }
    }
}
