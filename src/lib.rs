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

#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate serde_derive;

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod grid;
pub mod manifest;
pub mod math;
pub mod node;
pub mod reader;
pub mod tile_format;

pub use catalog::Catalog;
pub use config::BuildConfig;
pub use coordinator::{build, BuildContext, BuildStats};
pub use math::{Aabb, NodeName, SubdivisionType};
pub use reader::{InMemoryPointSource, PointBatch, PointSource, ReaderDone};
pub use tile_format::Tile;
