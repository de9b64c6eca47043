// SPDX-License-Identifier: GPL-3.0-only

//! Partition spec grammar
//!
//! Two forms describe one partition each:
//!
//! - short: `partition<NN>[_msdos|_gpt]_<ENDPOS>_<TYPE>[.tar|.tar.gz]`, where
//!   `_` and spaces are interchangeable and `<ENDPOS>` is an absolute offset
//!   from the start of the image or `100%`
//! - long: `partition<NN>[ -- dd <FULLSIZE>] -- parted <ARGS>[.tar|.tar.gz]`,
//!   where `<ARGS>` go to `parted` untouched
//!
//! Specs come from directory entries (`scan_directory`) or from the command
//! line as `SPEC[=CONTENT]` tokens (`SpecEntry::from_cli`).

use std::convert::Infallible;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use diskimg_contracts::MalformedSpec;
use diskimg_types::{ByteSize, ContentSource, EndPosition, FilesystemType, PartitionSpec, TableType};
use tracing::debug;

const PREFIX: &str = "partition";
const SECTION_SEPARATOR: &str = "--";
const LABEL_COMMANDS: [&str; 2] = ["mklabel", "mktable"];

/// Every `parted` command keyword. Marks where the arguments of `mkpart` end.
const PARTED_COMMANDS: &[&str] = &[
    "align-check",
    "disk_set",
    "disk_toggle",
    "help",
    "mklabel",
    "mkpart",
    "mktable",
    "name",
    "print",
    "quit",
    "rescue",
    "resizepart",
    "rm",
    "select",
    "set",
    "toggle",
    "type",
    "unit",
    "version",
];

/// A spec identifier together with the path its content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecEntry {
    pub identifier: String,
    pub content: Option<PathBuf>,
}

impl SpecEntry {
    pub fn new(identifier: impl Into<String>, content: Option<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            content,
        }
    }

    /// `SPEC[=PATH]` as given on the command line
    pub fn from_cli(token: &str) -> Self {
        match token.split_once('=') {
            Some((identifier, path)) if !path.trim().is_empty() => {
                Self::new(identifier.trim(), Some(PathBuf::from(path.trim())))
            }
            Some((identifier, _)) => Self::new(identifier.trim(), None),
            None => Self::new(token.trim(), None),
        }
    }

    pub fn parse(&self) -> Result<PartitionSpec, MalformedSpec> {
        parse(&self.identifier, self.content.as_deref())
    }
}

impl FromStr for SpecEntry {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_cli(s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Archive {
    Tar,
    TarGz,
}

impl Archive {
    fn source(self, path: PathBuf) -> ContentSource {
        match self {
            Archive::Tar => ContentSource::Tar(path),
            Archive::TarGz => ContentSource::TarGz(path),
        }
    }
}

fn split_archive_suffix(name: &str) -> (&str, Option<Archive>) {
    if let Some(body) = name.strip_suffix(".tar.gz") {
        (body, Some(Archive::TarGz))
    } else if let Some(body) = name.strip_suffix(".tar") {
        (body, Some(Archive::Tar))
    } else {
        (name, None)
    }
}

fn content_source(identifier: &str, archive: Option<Archive>, content: Option<&Path>) -> ContentSource {
    match (archive, content) {
        (Some(kind), path) => kind.source(
            path.map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(identifier)),
        ),
        (None, Some(path)) => match split_archive_suffix(&path.to_string_lossy()).1 {
            Some(kind) => kind.source(path.to_path_buf()),
            None => ContentSource::Directory(path.to_path_buf()),
        },
        (None, None) => ContentSource::None,
    }
}

/// Parse one partition identifier. `content` is the directory or archive the
/// partition is populated from; `None` leaves the partition empty unless the
/// identifier itself names an archive.
pub fn parse(identifier: &str, content: Option<&Path>) -> Result<PartitionSpec, MalformedSpec> {
    let identifier = identifier.trim();
    let (body, archive) = split_archive_suffix(identifier);
    let tokens: Vec<&str> = body.split_whitespace().collect();

    let mut spec = if tokens.contains(&SECTION_SEPARATOR) {
        parse_long(identifier, &tokens)?
    } else {
        parse_short(identifier, body)?
    };
    spec.content = content_source(identifier, archive, content);
    Ok(spec)
}

fn parse_index(input: &str, token: &str) -> Result<u32, MalformedSpec> {
    let digits = token
        .strip_prefix(PREFIX)
        .ok_or_else(|| MalformedSpec::new(input, token, "expected 'partition<NN>'"))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MalformedSpec::new(
            input,
            token,
            "partition number must be digits, e.g. partition01",
        ));
    }
    let index: u32 = digits
        .parse()
        .map_err(|_| MalformedSpec::new(input, token, "partition number is too large"))?;
    if index == 0 {
        return Err(MalformedSpec::new(input, token, "partition numbers start at 1"));
    }
    Ok(index)
}

fn parse_end(input: &str, token: &str) -> Result<EndPosition, MalformedSpec> {
    if token == "100%" {
        return Ok(EndPosition::Fill);
    }
    if token.ends_with('%') {
        return Err(MalformedSpec::new(
            input,
            token,
            "only 100% may be used as a percentage end position",
        ));
    }
    token
        .parse::<ByteSize>()
        .map(EndPosition::Absolute)
        .map_err(|error| MalformedSpec::new(input, token, error.to_string()))
}

fn parse_filesystem(input: &str, token: &str) -> Result<FilesystemType, MalformedSpec> {
    let valid = token.starts_with(|c: char| c.is_ascii_alphabetic())
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid {
        return Err(MalformedSpec::new(input, token, "invalid filesystem type"));
    }
    if token.eq_ignore_ascii_case("swap") {
        return Ok(FilesystemType::new(FilesystemType::SWAP));
    }
    Ok(FilesystemType::new(token))
}

fn parse_short(input: &str, body: &str) -> Result<PartitionSpec, MalformedSpec> {
    let fields: Vec<&str> = body
        .split(['_', ' '])
        .filter(|field| !field.is_empty())
        .collect();
    let Some((head, mut rest)) = fields.split_first() else {
        return Err(MalformedSpec::new(input, input, "empty partition spec"));
    };
    let index = parse_index(input, head)?;

    let mut table_type = None;
    if let Some((marker, remaining)) = rest.split_first()
        && (marker.eq_ignore_ascii_case("msdos") || marker.eq_ignore_ascii_case("gpt"))
    {
        table_type = marker.parse::<TableType>().ok();
        rest = remaining;
    }

    let (end, filesystem) = match rest {
        [end, filesystem] => (*end, *filesystem),
        [] | [_] => {
            let token = rest.first().copied().unwrap_or(*head);
            return Err(MalformedSpec::new(
                input,
                token,
                "expected '<ENDPOS>_<TYPE>' after the partition number",
            ));
        }
        [_, _, extra, ..] => {
            return Err(MalformedSpec::new(input, *extra, "unexpected token"));
        }
    };

    Ok(PartitionSpec {
        index,
        table_type,
        end_position: Some(parse_end(input, end)?),
        filesystem: parse_filesystem(input, filesystem)?,
        content: ContentSource::None,
        parted_args: Vec::new(),
        dd_size: None,
        token: input.to_string(),
    })
}

fn parse_long(input: &str, tokens: &[&str]) -> Result<PartitionSpec, MalformedSpec> {
    let separator = tokens
        .iter()
        .position(|token| *token == SECTION_SEPARATOR)
        .unwrap_or(tokens.len());
    let head: Vec<&str> = tokens[..separator]
        .iter()
        .flat_map(|token| token.split('_'))
        .filter(|field| !field.is_empty())
        .collect();
    let index = match head.as_slice() {
        [head] => parse_index(input, head)?,
        [] => return Err(MalformedSpec::new(input, SECTION_SEPARATOR, "missing 'partition<NN>'")),
        [_, extra, ..] => {
            return Err(MalformedSpec::new(
                input,
                *extra,
                "short-form fields cannot precede a '--' section",
            ));
        }
    };

    let mut dd_size = None;
    let mut parted_args: Option<Vec<String>> = None;
    for section in tokens[separator + 1..].split(|token| *token == SECTION_SEPARATOR) {
        match section {
            [] => {
                return Err(MalformedSpec::new(input, SECTION_SEPARATOR, "empty section"));
            }
            ["dd", size] => {
                if dd_size.is_some() {
                    return Err(MalformedSpec::new(input, "dd", "dd given twice"));
                }
                let size = size
                    .parse::<ByteSize>()
                    .map_err(|error| MalformedSpec::new(input, *size, error.to_string()))?;
                dd_size = Some(size);
            }
            ["dd", ..] => {
                return Err(MalformedSpec::new(input, "dd", "dd takes exactly one size"));
            }
            ["parted", args @ ..] => {
                if parted_args.is_some() {
                    return Err(MalformedSpec::new(input, "parted", "parted given twice"));
                }
                if args.is_empty() {
                    return Err(MalformedSpec::new(input, "parted", "parted needs arguments"));
                }
                parted_args = Some(args.iter().map(|arg| arg.to_string()).collect());
            }
            [keyword, ..] => {
                return Err(MalformedSpec::new(
                    input,
                    *keyword,
                    "unknown section, expected 'dd' or 'parted'",
                ));
            }
        }
    }

    let parted_args = parted_args
        .ok_or_else(|| MalformedSpec::new(input, tokens[0], "missing '-- parted' section"))?;
    let table_type = declared_table_type(input, &parted_args)?;
    let filesystem = mkpart_filesystem(input, &parted_args)?;

    Ok(PartitionSpec {
        index,
        table_type,
        end_position: None,
        filesystem,
        content: ContentSource::None,
        parted_args,
        dd_size,
        token: input.to_string(),
    })
}

fn declared_table_type(input: &str, args: &[String]) -> Result<Option<TableType>, MalformedSpec> {
    let Some(position) = args
        .iter()
        .position(|arg| LABEL_COMMANDS.contains(&arg.as_str()))
    else {
        return Ok(None);
    };
    let command = args[position].as_str();
    let label = args
        .get(position + 1)
        .ok_or_else(|| MalformedSpec::new(input, command, "missing table type"))?;
    label
        .parse::<TableType>()
        .map(Some)
        .map_err(|reason| MalformedSpec::new(input, label.as_str(), reason))
}

/// Arguments of the single `mkpart` command in `args`
pub(crate) fn mkpart_arguments(args: &[String]) -> Option<&[String]> {
    let mut positions = args
        .iter()
        .enumerate()
        .filter(|(_, arg)| *arg == "mkpart")
        .map(|(position, _)| position);
    let start = positions.next()? + 1;
    if positions.next().is_some() {
        return None;
    }
    let len = args[start..]
        .iter()
        .position(|arg| PARTED_COMMANDS.contains(&arg.as_str()))
        .unwrap_or(args.len() - start);
    Some(&args[start..start + len])
}

fn mkpart_filesystem(input: &str, args: &[String]) -> Result<FilesystemType, MalformedSpec> {
    let count = args.iter().filter(|arg| *arg == "mkpart").count();
    if count != 1 {
        return Err(MalformedSpec::new(
            input,
            "mkpart",
            format!("expected exactly one mkpart command, found {count}"),
        ));
    }
    match mkpart_arguments(args) {
        Some([_, _, _]) => Ok(FilesystemType::none()),
        Some([_, filesystem, _, _]) => parse_filesystem(input, filesystem),
        _ => Err(MalformedSpec::new(
            input,
            "mkpart",
            "mkpart takes '<type-or-name> [fs] <start> <end>'",
        )),
    }
}

/// Parse every entry and check the set: indices strictly increasing in
/// declaration order and `dd` only on the first partition.
pub fn parse_set(entries: &[SpecEntry]) -> Result<Vec<PartitionSpec>, MalformedSpec> {
    if entries.is_empty() {
        return Err(MalformedSpec::new("", "", "no partitions found"));
    }

    let mut specs: Vec<PartitionSpec> = Vec::with_capacity(entries.len());
    for entry in entries {
        let spec = entry.parse()?;
        if let Some(previous) = specs.last() {
            if spec.index == previous.index {
                return Err(MalformedSpec::new(
                    &spec.token,
                    &spec.token,
                    format!("duplicate partition number {}", spec.index),
                ));
            }
            if spec.index < previous.index {
                return Err(MalformedSpec::new(
                    &spec.token,
                    &spec.token,
                    format!(
                        "partition {} declared after partition {}",
                        spec.index, previous.index
                    ),
                ));
            }
            if spec.dd_size.is_some() {
                return Err(MalformedSpec::new(
                    &spec.token,
                    "dd",
                    "dd is only accepted on the first partition",
                ));
            }
        }
        debug!(index = spec.index, form = ?spec.form(), filesystem = %spec.filesystem, content = %spec.content, "parsed partition spec");
        specs.push(spec);
    }
    Ok(specs)
}

fn leading_index(name: &str) -> Option<u32> {
    let digits: String = name
        .strip_prefix(PREFIX)?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Partition entries in `dir`, ordered by their number.
///
/// Directories and `.tar`/`.tar.gz` files carry content; any other file
/// named like a partition declares an empty one.
pub fn scan_directory(dir: &Path) -> io::Result<Vec<SpecEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!(path = %entry.path().display(), "skipping non UTF-8 entry");
            continue;
        };
        if leading_index(&name).is_none() {
            continue;
        }

        let path = entry.path();
        let content = if fs::metadata(&path)?.is_dir() || split_archive_suffix(&name).1.is_some() {
            Some(path)
        } else {
            None
        };
        entries.push(SpecEntry::new(name, content));
    }

    entries.sort_by(|a, b| {
        leading_index(&a.identifier)
            .cmp(&leading_index(&b.identifier))
            .then_with(|| a.identifier.cmp(&b.identifier))
    });
    debug!(dir = %dir.display(), count = entries.len(), "scanned partition entries");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use diskimg_types::{GIB, MIB, SpecForm};

    use super::*;

    fn short(identifier: &str) -> PartitionSpec {
        parse(identifier, None).unwrap()
    }

    fn malformed(identifier: &str) -> MalformedSpec {
        parse(identifier, None).unwrap_err()
    }

    #[test]
    fn parses_short_form() {
        let spec = short("partition01_8MiB_fat32");
        assert_eq!(spec.index, 1);
        assert_eq!(spec.table_type, None);
        assert_eq!(spec.end_position, Some(EndPosition::Absolute(ByteSize::mib(8))));
        assert_eq!(spec.filesystem, FilesystemType::new("fat32"));
        assert_eq!(spec.content, ContentSource::None);
        assert_eq!(spec.form(), SpecForm::Short);
    }

    #[test]
    fn separators_are_interchangeable() {
        for identifier in [
            "partition02_16GiB_ext4",
            "partition02 16GiB ext4",
            "partition02_16GiB ext4",
        ] {
            let mut spec = short(identifier);
            spec.token.clear();
            let mut expected = short("partition02_16GiB_ext4");
            expected.token.clear();
            assert_eq!(spec, expected, "{identifier}");
        }
        assert_eq!(
            short("partition02_16GiB_ext4").end_position,
            Some(EndPosition::Absolute(ByteSize::from_bytes(16 * GIB)))
        );
    }

    #[test]
    fn table_marker_and_fill() {
        let spec = short("partition1_msdos_100%_none");
        assert_eq!(spec.table_type, Some(TableType::Msdos));
        assert_eq!(spec.end_position, Some(EndPosition::Fill));
        assert!(spec.filesystem.is_none());

        assert_eq!(short("partition1_gpt_1GiB_xfs").table_type, Some(TableType::Gpt));
        assert_eq!(
            short("partition3_4GiB_swap").filesystem,
            FilesystemType::new("linux-swap")
        );
    }

    #[test]
    fn archive_suffix_selects_extraction() {
        let spec = short("partition01_8MiB_fat32.tar");
        assert_eq!(
            spec.content,
            ContentSource::Tar(PathBuf::from("partition01_8MiB_fat32.tar"))
        );

        let spec = parse("partition02_100%_ext4.tar.gz", Some(Path::new("/in/root.tar.gz"))).unwrap();
        assert_eq!(spec.content, ContentSource::TarGz(PathBuf::from("/in/root.tar.gz")));
        assert_eq!(spec.filesystem, FilesystemType::new("ext4"));
    }

    #[test]
    fn content_paths_default_to_directories() {
        let spec = parse("partition01_8MiB_fat32", Some(Path::new("/in/boot"))).unwrap();
        assert_eq!(spec.content, ContentSource::Directory(PathBuf::from("/in/boot")));

        let spec = parse("partition01_8MiB_fat32", Some(Path::new("/in/boot.tar"))).unwrap();
        assert_eq!(spec.content, ContentSource::Tar(PathBuf::from("/in/boot.tar")));
    }

    #[test]
    fn parses_long_form() {
        let spec = short("partition01 -- dd 256MiB -- parted mklabel msdos mkpart primary fat32 1 8MiB");
        assert_eq!(spec.form(), SpecForm::Long);
        assert_eq!(spec.index, 1);
        assert_eq!(spec.dd_size, Some(ByteSize::mib(256)));
        assert_eq!(spec.table_type, Some(TableType::Msdos));
        assert_eq!(spec.filesystem, FilesystemType::new("fat32"));
        assert_eq!(spec.end_position, None);
        assert_eq!(
            spec.parted_args,
            vec!["mklabel", "msdos", "mkpart", "primary", "fat32", "1", "8MiB"]
        );

        let spec = short("partition02 -- parted mkpart primary ext4 8MiB 100%");
        assert_eq!(spec.dd_size, None);
        assert_eq!(spec.table_type, None);
        assert_eq!(spec.filesystem, FilesystemType::new("ext4"));
    }

    #[test]
    fn long_form_without_filesystem_is_raw() {
        let spec = short("partition03 -- parted mkpart primary 200MiB 100% set 3 esp on");
        assert!(spec.filesystem.is_none());
        assert_eq!(
            mkpart_arguments(&spec.parted_args).map(<[String]>::len),
            Some(3)
        );
    }

    #[test]
    fn rejects_malformed_short_forms() {
        assert_eq!(malformed("partition01_8_fat32").token, "8");
        assert_eq!(malformed("partition01_8MiB").token, "8MiB");
        assert_eq!(malformed("partition01_8MiB_fat32_extra").token, "extra");
        assert_eq!(malformed("partition01_50%_ext4").token, "50%");
        assert_eq!(malformed("partitionA_8MiB_fat32").token, "partitionA");
        assert_eq!(malformed("partition00_8MiB_fat32").token, "partition00");
        assert_eq!(malformed("disk01_8MiB_fat32").token, "disk01");
        assert_eq!(malformed("partition01_8MiB_fat/32").token, "fat/32");
        assert_eq!(malformed("").reason, "empty partition spec");
    }

    #[test]
    fn rejects_malformed_long_forms() {
        let error = malformed("partition01_8MiB -- parted mkpart primary 1 8MiB");
        assert_eq!(error.token, "8MiB");
        assert!(error.reason.contains("cannot precede"));

        assert_eq!(malformed("partition01 -- dd 256 -- parted mkpart p 1 2").token, "256");
        assert_eq!(malformed("partition01 -- fdisk n p 1").token, "fdisk");
        assert_eq!(malformed("partition01 -- dd 1GiB").token, "partition01");
        assert_eq!(malformed("partition01 -- parted mklabel loop mkpart p 1 2").token, "loop");
        assert_eq!(
            malformed("partition01 -- parted mkpart p 1 2 mkpart p 2 3").token,
            "mkpart"
        );
        assert_eq!(malformed("partition01 -- parted mklabel gpt").token, "mkpart");
        assert_eq!(malformed("partition01 -- -- parted mkpart p 1 2").token, "--");
    }

    #[test]
    fn cli_tokens_carry_content_paths() {
        let entry = SpecEntry::from_cli("partition01_8MiB_fat32=/srv/boot");
        assert_eq!(entry.identifier, "partition01_8MiB_fat32");
        assert_eq!(entry.content, Some(PathBuf::from("/srv/boot")));
        assert_eq!(SpecEntry::from_cli("partition02_100%_ext4").content, None);
        assert_eq!(SpecEntry::from_cli("partition02_100%_ext4=").content, None);
    }

    #[test]
    fn set_requires_increasing_indices() {
        let entries = [
            SpecEntry::from_cli("partition02_8MiB_fat32"),
            SpecEntry::from_cli("partition01_16MiB_ext4"),
        ];
        assert!(parse_set(&entries).unwrap_err().reason.contains("declared after"));

        let entries = [
            SpecEntry::from_cli("partition01_8MiB_fat32"),
            SpecEntry::from_cli("partition1_16MiB_ext4"),
        ];
        assert!(parse_set(&entries).unwrap_err().reason.contains("duplicate"));

        assert_eq!(parse_set(&[]).unwrap_err().reason, "no partitions found");
    }

    #[test]
    fn set_accepts_dd_only_first() {
        let entries = [
            SpecEntry::from_cli("partition01 -- parted mklabel msdos mkpart primary fat32 1 8MiB"),
            SpecEntry::from_cli("partition02 -- dd 256MiB -- parted mkpart primary ext4 8MiB 100%"),
        ];
        let error = parse_set(&entries).unwrap_err();
        assert_eq!(error.token, "dd");

        let entries = [
            SpecEntry::from_cli("partition01_8MiB_fat32"),
            SpecEntry::from_cli("partition02_16MiB_ext4"),
        ];
        let specs = parse_set(&entries).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(
            specs[1].end_position,
            Some(EndPosition::Absolute(ByteSize::from_bytes(16 * MIB)))
        );
    }

    #[test]
    fn leading_index_ignores_suffixes() {
        assert_eq!(leading_index("partition07_1GiB_ext4"), Some(7));
        assert_eq!(leading_index("partition12 -- parted x"), Some(12));
        assert_eq!(leading_index("partitions"), None);
        assert_eq!(leading_index("README"), None);
    }
}
