//! Path normalization and parent/child helpers.
//!
//! A normalized path is absolute, has no empty segments, no `.` or `..`
//! segments and no trailing slash (except the root itself).

use bfs_types::status_code::NamespaceCode;
use bfs_types::{make_error_msg, Result};

pub const ROOT: &str = "/";

/// Characters that may not appear inside a path segment.
const RESERVED_CHARS: &[char] = &[':', '\0', '\\'];

/// Stateless path helpers.
pub struct PathResolver;

impl PathResolver {
    /// Normalize `raw` into canonical form.
    ///
    /// `.` segments are dropped and `..` pops the previous segment; popping
    /// past the root is an error. One trailing slash is tolerated.
    pub fn normalize(raw: &str) -> Result<String> {
        if !raw.starts_with('/') {
            return make_error_msg(
                NamespaceCode::INVALID_PATH,
                format!("path must be absolute: {:?}", raw),
            );
        }
        let mut body = &raw[1..];
        if body.len() > 1 {
            body = body.strip_suffix('/').unwrap_or(body);
        }
        if body.is_empty() {
            return Ok(ROOT.to_string());
        }

        let mut out: Vec<&str> = Vec::new();
        for seg in body.split('/') {
            match seg {
                "" => {
                    return make_error_msg(
                        NamespaceCode::INVALID_PATH,
                        format!("empty segment in {:?}", raw),
                    )
                }
                "." => {}
                ".." => {
                    if out.pop().is_none() {
                        return make_error_msg(
                            NamespaceCode::INVALID_PATH,
                            format!("{:?} escapes the root", raw),
                        );
                    }
                }
                _ => {
                    if seg.contains(RESERVED_CHARS) || seg.chars().any(char::is_control) {
                        return make_error_msg(
                            NamespaceCode::INVALID_PATH,
                            format!("reserved character in segment {:?}", seg),
                        );
                    }
                    out.push(seg);
                }
            }
        }

        if out.is_empty() {
            return Ok(ROOT.to_string());
        }
        let mut path = String::with_capacity(body.len() + 1);
        for seg in out {
            path.push('/');
            path.push_str(seg);
        }
        Ok(path)
    }

    pub fn is_root(path: &str) -> bool {
        path == ROOT
    }

    /// Parent of a normalized path; `None` for the root.
    pub fn parent(path: &str) -> Option<&str> {
        if Self::is_root(path) {
            return None;
        }
        match path.rfind('/') {
            Some(0) => Some(ROOT),
            Some(idx) => Some(&path[..idx]),
            None => None,
        }
    }

    /// Final segment of a normalized path; empty for the root.
    pub fn file_name(path: &str) -> &str {
        match path.rfind('/') {
            Some(idx) => &path[idx + 1..],
            None => path,
        }
    }

    pub fn segments(path: &str) -> impl Iterator<Item = &str> {
        path.split('/').filter(|s| !s.is_empty())
    }

    pub fn join(parent: &str, name: &str) -> String {
        if Self::is_root(parent) {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent, name)
        }
    }

    /// True if `a` is a strict ancestor of `b`.
    pub fn is_ancestor(a: &str, b: &str) -> bool {
        if a == b {
            return false;
        }
        if Self::is_root(a) {
            return true;
        }
        b.len() > a.len() && b.starts_with(a) && b.as_bytes()[a.len()] == b'/'
    }

    /// Rewrite `path` (equal to or under `from`) to live under `to`.
    pub(crate) fn rebase(path: &str, from: &str, to: &str) -> String {
        if path == from {
            return to.to_string();
        }
        let rest = &path[from.len()..];
        if Self::is_root(to) {
            rest.to_string()
        } else {
            format!("{}{}", to, rest)
        }
    }
}
