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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A node's address in the tree: each byte is a child index (0..8 for an
/// octree node, restricted to {0,2,4,6} below a quadtree node) chosen on the
/// path down from the root. The empty name is the root.
#[derive(Debug, PartialEq, Eq, Clone, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeName(Vec<u8>);

impl NodeName {
    pub fn root() -> Self {
        NodeName(Vec::new())
    }

    pub fn from_path(path: Vec<u8>) -> Self {
        debug_assert!(path.iter().all(|&c| c < 8));
        NodeName(path)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn path(&self) -> &[u8] {
        &self.0
    }

    pub fn child(&self, index: u8) -> NodeName {
        assert!(index < 8);
        let mut path = self.0.clone();
        path.push(index);
        NodeName(path)
    }

    pub fn parent(&self) -> Option<NodeName> {
        if self.0.is_empty() {
            None
        } else {
            Some(NodeName(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// True iff `self` is `other`, or an ancestor of `other`, i.e. `other`'s
    /// path starts with `self`'s path. Every name is its own ancestor; this
    /// is the relation the coordinator's finalization rule is phrased in
    /// terms of.
    pub fn is_ancestor_of_or_self(&self, other: &NodeName) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Relative file path for this node's tile, mirroring the convention of
    /// splitting long octal paths into fixed-size directory segments so no
    /// single directory ends up with an unreasonable number of entries.
    pub fn to_file_path(&self) -> PathBuf {
        let mut out = String::from("r");
        for &digit in &self.0 {
            out.push((b'0' + digit) as char);
        }
        PathBuf::from(out)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "r")?;
        for &digit in &self.0 {
            write!(f, "{}", digit)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ParseNodeNameError(String);

impl fmt::Display for ParseNodeNameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeName {
    type Err = ParseNodeNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        if chars.next() != Some('r') {
            return Err(ParseNodeNameError(format!(
                "node name must start with 'r': {:?}",
                s
            )));
        }
        let mut path = Vec::with_capacity(s.len() - 1);
        for c in chars {
            let digit = c.to_digit(8).ok_or_else(|| {
                ParseNodeNameError(format!("invalid octal digit {:?} in {:?}", c, s))
            })?;
            path.push(digit as u8);
        }
        Ok(NodeName(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_root_display_and_parse() {
        let root = NodeName::root();
        assert_eq!(root.to_string(), "r");
        assert_eq!(NodeName::from_str("r").unwrap(), root);
    }

    #[test]
    fn test_child_and_parent_roundtrip() {
        let root = NodeName::root();
        let child = root.child(5);
        assert_eq!(child.to_string(), "r5");
        assert_eq!(child.parent(), Some(root));
    }

    #[test]
    fn test_is_ancestor_of_or_self() {
        let a = NodeName::from_str("r12").unwrap();
        let b = NodeName::from_str("r123").unwrap();
        let c = NodeName::from_str("r124").unwrap();
        assert!(a.is_ancestor_of_or_self(&b));
        assert!(a.is_ancestor_of_or_self(&a));
        assert!(a.is_ancestor_of_or_self(&c));
        assert!(!b.is_ancestor_of_or_self(&a));
        assert!(!c.is_ancestor_of_or_self(&b));
        assert!(!b.is_ancestor_of_or_self(&c));
    }
}
