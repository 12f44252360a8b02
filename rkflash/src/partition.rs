//! mtdparts partition lookup.
//!
//! The parameter block carries a kernel command line with a definition like
//!
//! ```text
//! mtdparts=rk29xxnand:0x2000@0x4000(boot),0x10000@0x6000(system),-@0x16000(user)
//! ```
//!
//! Descriptors are `size@offset(name)`, in sectors, joined by `,` after a
//! `device:` prefix. A size of `-` means "up to the end of the device".
//!
//! Lookup works backward from the `(name)` token: the nearest `@` holds
//! the offset and the nearest delimiter before that holds the size. The
//! named partition's own markers are always the closest ones.

use std::fmt;

use crate::error::SyntaxError;

/// Key that starts the partition definition.
pub const MTDPARTS_KEY: &str = "mtdparts=";

/// Size part of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionSize {
    /// Explicit size in sectors.
    Sectors(u32),
    /// Everything from the offset to the end of the device.
    ToEnd,
}

/// A partition as written in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    /// Partition name.
    pub name: String,
    /// First sector.
    pub offset: u32,
    /// Size as written.
    pub size: PartitionSize,
}

impl PartitionLayout {
    /// Whether the size depends on the device capacity.
    pub fn extends_to_end(&self) -> bool {
        self.size == PartitionSize::ToEnd
    }

    /// Resolve to concrete sectors on a device of `total_sectors`.
    ///
    /// `total_sectors` is only consulted for [`PartitionSize::ToEnd`].
    pub fn into_spec(self, total_sectors: u32) -> Result<PartitionSpec, SyntaxError> {
        let size = match self.size {
            PartitionSize::Sectors(size) => size,
            PartitionSize::ToEnd => total_sectors.checked_sub(self.offset).ok_or_else(|| {
                SyntaxError::BadSyntax(format!(
                    "{} starts at {:#x}, past the end of the device ({:#x})",
                    self.name, self.offset, total_sectors
                ))
            })?,
        };
        Ok(PartitionSpec {
            name: self.name,
            offset: self.offset,
            size,
        })
    }
}

impl fmt::Display for PartitionLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            PartitionSize::Sectors(size) => {
                write!(f, "{:#010x}@{:#010x} {}", size, self.offset, self.name)
            },
            PartitionSize::ToEnd => write!(f, "{:>10}@{:#010x} {}", "-", self.offset, self.name),
        }
    }
}

/// A resolved partition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PartitionSpec {
    /// Partition name.
    pub name: String,
    /// First sector.
    pub offset: u32,
    /// Size in sectors.
    pub size: u32,
}

/// Find the `mtdparts=` definition in a command line.
///
/// The slice runs to the next whitespace or the end of the text.
pub fn find_mtdparts(text: &str) -> Option<&str> {
    let start = text.find(MTDPARTS_KEY)?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '\0')
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Look up `name` in an `mtdparts=` definition.
pub fn resolve(mtdparts: &str, name: &str) -> Result<PartitionLayout, SyntaxError> {
    let token = format!("({name})");
    let pos = mtdparts
        .find(&token)
        .ok_or_else(|| SyntaxError::PartitionNotFound(name.to_string()))?;
    let head = &mtdparts[..pos];

    let bad = || SyntaxError::BadSyntax(format!("{}{token}", tail(head)));

    let at = head.rfind('@').ok_or_else(bad)?;
    let offset = parse_number(&head[at + 1..]).ok_or_else(bad)?;
    let prefix = &head[..at];

    let size_field = |delim: char| prefix.rfind(delim).map(|i| &prefix[i + 1..]);
    let own_field = prefix.rfind([',', ':']).map(|i| &prefix[i + 1..]);

    let size = if head.ends_with('-') || own_field.is_some_and(|f| f.trim() == "-") {
        PartitionSize::ToEnd
    } else if let Some(field) = size_field(',') {
        PartitionSize::Sectors(parse_number(field).ok_or_else(bad)?)
    } else if let Some(field) = size_field(':') {
        PartitionSize::Sectors(parse_number(field).ok_or_else(bad)?)
    } else {
        return Err(bad());
    };

    Ok(PartitionLayout {
        name: name.to_string(),
        offset,
        size,
    })
}

/// Every partition in an `mtdparts=` definition, in table order.
pub fn list(mtdparts: &str) -> Result<Vec<PartitionLayout>, SyntaxError> {
    let mut parts = Vec::new();
    let mut rest = mtdparts;
    while let Some(open) = rest.find('(') {
        let after = &rest[open + 1..];
        let close = after
            .find(')')
            .ok_or_else(|| SyntaxError::BadSyntax(tail(rest).to_string()))?;
        parts.push(resolve(mtdparts, &after[..close])?);
        rest = &after[close + 1..];
    }
    Ok(parts)
}

/// Parse an unsigned number the way C `strtoul(s, _, 0)` does: `0x` for
/// hex, a leading `0` for octal, decimal otherwise. Parsing stops at the
/// first character that is not a digit of the base.
pub fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim_start();
    let text = text.strip_prefix('+').unwrap_or(text);

    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        if !hex.starts_with(|c: char| c.is_ascii_hexdigit()) {
            // "0x" with no hex digits parses as the leading zero
            return Some(0);
        }
        (hex, 16)
    } else if text.starts_with('0') {
        (text, 8)
    } else {
        (text, 10)
    };

    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    u32::from_str_radix(&digits[..end], radix).ok()
}

/// Last few characters of `s`, for error context.
fn tail(s: &str) -> &str {
    let start = s
        .char_indices()
        .rev()
        .nth(23)
        .map_or(0, |(i, _)| i);
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "mtdparts=nand:0x2000@0x4000(boot),0x10000@0x6000(system),-(userdata)";

    #[test]
    fn test_find_mtdparts() {
        let cmdline = "console=ttyS2 mtdparts=rk29xxnand:0x2000@0x2000(misc) init=/init";
        assert_eq!(
            find_mtdparts(cmdline),
            Some("mtdparts=rk29xxnand:0x2000@0x2000(misc)")
        );
        assert_eq!(find_mtdparts("console=ttyS2"), None);
    }

    #[test]
    fn test_resolve_middle_partition() {
        let part = resolve(TABLE, "system").unwrap();
        assert_eq!(part.offset, 0x6000);
        assert_eq!(part.size, PartitionSize::Sectors(0x10000));
    }

    #[test]
    fn test_resolve_first_partition_uses_colon() {
        let part = resolve(TABLE, "boot").unwrap();
        assert_eq!(part.offset, 0x4000);
        assert_eq!(part.size, PartitionSize::Sectors(0x2000));
    }

    #[test]
    fn test_resolve_trailing_dash_partition() {
        let part = resolve(TABLE, "userdata").unwrap();
        assert_eq!(part.offset, 0x6000);
        assert!(part.extends_to_end());

        let spec = part.into_spec(0x80000).unwrap();
        assert_eq!(spec.offset, 0x6000);
        assert_eq!(spec.size, 0x80000 - 0x6000);
    }

    #[test]
    fn test_resolve_dash_with_offset() {
        let table = "mtdparts=rk29xxnand:0x2000@0x2000(misc),-@0x16000(user)";
        let part = resolve(table, "user").unwrap();
        assert_eq!(part.offset, 0x16000);
        assert!(part.extends_to_end());
        assert!(part.into_spec(0x10000).is_err());
    }

    #[test]
    fn test_earlier_dash_does_not_leak() {
        let table = "mtdparts=x:-@0x100(a),0x20@0x200(b)";
        assert_eq!(
            resolve(table, "b").unwrap().size,
            PartitionSize::Sectors(0x20)
        );
    }

    #[test]
    fn test_resolve_missing_name() {
        assert_eq!(
            resolve(TABLE, "cache"),
            Err(SyntaxError::PartitionNotFound("cache".into()))
        );
    }

    #[test]
    fn test_resolve_bad_syntax() {
        assert!(matches!(
            resolve("mtdparts=nand:0x2000(boot)", "boot"),
            Err(SyntaxError::BadSyntax(_))
        ));
        assert!(matches!(
            resolve("mtdparts=0x2000@0x4000(boot)", "boot"),
            Err(SyntaxError::BadSyntax(_))
        ));
        assert!(matches!(
            resolve("mtdparts=nand:0x2000@zz(boot)", "boot"),
            Err(SyntaxError::BadSyntax(_))
        ));
    }

    #[test]
    fn test_list_partitions() {
        let parts = list(TABLE).unwrap();
        let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["boot", "system", "userdata"]);
        assert!(list("mtdparts=nand:0x10@0x0(boot").is_err());
        assert!(list("mtdparts=").unwrap().is_empty());
    }

    #[test]
    fn test_parse_number_bases() {
        assert_eq!(parse_number("0x4000(boot)"), Some(0x4000));
        assert_eq!(parse_number("0X1f"), Some(0x1F));
        assert_eq!(parse_number("0755"), Some(0o755));
        assert_eq!(parse_number("1234,"), Some(1234));
        assert_eq!(parse_number("0"), Some(0));
        assert_eq!(parse_number("089"), Some(0));
        assert_eq!(parse_number("0x"), Some(0));
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("0x100000000"), None);
    }
}
