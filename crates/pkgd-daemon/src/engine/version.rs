//! Version ordering and name globbing for the catalog engine.

use std::cmp::Ordering;

use pkgd_core::PackageId;

/// Compares two version strings segment by segment, rpm style.
///
/// Separators are skipped; numeric segments compare as numbers and sort
/// above alphabetic ones; a version with segments left over is newer.
#[must_use]
pub fn vercmp(a: &str, b: &str) -> Ordering {
    let mut a = a;
    let mut b = b;
    loop {
        a = a.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
        b = b.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());

        let (Some(ac), Some(bc)) = (a.chars().next(), b.chars().next()) else {
            return (!a.is_empty()).cmp(&!b.is_empty());
        };

        let numeric = ac.is_ascii_digit();
        if numeric != bc.is_ascii_digit() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let (seg_a, rest_a) = split_segment(a, numeric);
        let (seg_b, rest_b) = split_segment(b, numeric);
        let ord = if numeric {
            let seg_a = seg_a.trim_start_matches('0');
            let seg_b = seg_b.trim_start_matches('0');
            seg_a.len().cmp(&seg_b.len()).then_with(|| seg_a.cmp(seg_b))
        } else {
            seg_a.cmp(seg_b)
        };
        if ord != Ordering::Equal {
            return ord;
        }
        a = rest_a;
        b = rest_b;
    }
}

fn split_segment(s: &str, numeric: bool) -> (&str, &str) {
    let end = s
        .find(|c: char| {
            if numeric {
                !c.is_ascii_digit()
            } else {
                !c.is_ascii_alphabetic()
            }
        })
        .unwrap_or(s.len());
    s.split_at(end)
}

/// Compares epoch, version and release of two packages.
#[must_use]
pub fn evr_cmp(a: &PackageId, b: &PackageId) -> Ordering {
    epoch(&a.epoch)
        .cmp(&epoch(&b.epoch))
        .then_with(|| vercmp(&a.version, &b.version))
        .then_with(|| vercmp(&a.release, &b.release))
}

fn epoch(s: &str) -> u64 {
    s.parse().unwrap_or(0)
}

/// Shell-style match of `name` against `pattern` (`*` and `?`).
#[must_use]
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            },
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            },
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                },
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vercmp() {
        assert_eq!(vercmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(vercmp("1.10", "1.9"), Ordering::Greater);
        assert_eq!(vercmp("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(vercmp("2.0a", "2.0"), Ordering::Greater);
        assert_eq!(vercmp("1.0a", "1.0b"), Ordering::Less);
        assert_eq!(vercmp("1.01", "1.1"), Ordering::Equal);
        assert_eq!(vercmp("1.0", "1.a"), Ordering::Greater);
        assert_eq!(vercmp("3.2.22", "3.2.8"), Ordering::Greater);
    }

    #[test]
    fn test_evr_epoch_wins() {
        let old: PackageId = "foo,1,1.0,1,noarch,base".parse().unwrap();
        let new: PackageId = "foo,,9.0,1,noarch,base".parse().unwrap();
        assert_eq!(evr_cmp(&old, &new), Ordering::Greater);

        let rel: PackageId = "foo,1,1.0,2,noarch,base".parse().unwrap();
        assert_eq!(evr_cmp(&old, &rel), Ordering::Less);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("yum*", "yum-utils"));
        assert!(glob_match("yum*", "yum"));
        assert!(glob_match("*-devel", "glibc-devel"));
        assert!(glob_match("gl?bc", "glibc"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("yum", "yum-utils"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(!glob_match("gl?bc", "glbc"));
    }
}
