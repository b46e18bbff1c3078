// Block device enumeration via lsblk's JSON output
//
// lsblk has changed its JSON encoding across util-linux releases: booleans
// were "0"/"1" strings before 2.33 and sizes are strings unless -b is honored
// as numbers. Both encodings are accepted.

use crate::tools::{PrivilegeToken, ToolCommand, ToolRunner};
use crate::{EraseError, EraseResult};
use serde::{Deserialize, Deserializer, Serialize};

pub(crate) const LSBLK_COLUMNS: &str = "NAME,PATH,SIZE,TYPE,MOUNTPOINT,MODEL,SERIAL,ROTA,RO";

/// Immutable snapshot of one enumerated block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub device_type: String,
    pub mountpoint: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub rotational: Option<bool>,
    pub read_only: bool,
}

impl BlockDevice {
    pub fn is_partition(&self) -> bool {
        self.device_type == "part"
    }
}

#[derive(Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkEntry>,
}

#[derive(Deserialize)]
struct LsblkEntry {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, deserialize_with = "flex_u64")]
    size: Option<u64>,
    #[serde(rename = "type", default)]
    device_type: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default, deserialize_with = "flex_bool")]
    rota: Option<bool>,
    #[serde(default, deserialize_with = "flex_bool")]
    ro: Option<bool>,
    #[serde(default)]
    children: Vec<LsblkEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flex {
    Bool(bool),
    Num(u64),
    Str(String),
}

fn flex_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Flex> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Flex::Bool(b) => Some(b),
        Flex::Num(n) => Some(n != 0),
        Flex::Str(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
    }))
}

fn flex_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Flex> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Flex::Num(n) => Some(n),
        Flex::Str(s) => s.trim().parse().ok(),
        Flex::Bool(_) => None,
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn flatten(entry: LsblkEntry, out: &mut Vec<BlockDevice>) {
    let path = entry
        .path
        .clone()
        .unwrap_or_else(|| format!("/dev/{}", entry.name));
    out.push(BlockDevice {
        path,
        name: entry.name,
        size: entry.size.unwrap_or(0),
        device_type: entry.device_type.unwrap_or_else(|| "disk".to_string()),
        mountpoint: non_empty(entry.mountpoint),
        model: non_empty(entry.model),
        serial: non_empty(entry.serial),
        rotational: entry.rota,
        read_only: entry.ro.unwrap_or(false),
    });
    for child in entry.children {
        flatten(child, out);
    }
}

/// Parse `lsblk -J -b -o ...` output, flattening partitions after their disk.
pub fn parse_lsblk_json(json: &str) -> EraseResult<Vec<BlockDevice>> {
    let parsed: LsblkOutput = serde_json::from_str(json)?;
    let mut devices = Vec::new();
    for entry in parsed.blockdevices {
        flatten(entry, &mut devices);
    }
    Ok(devices)
}

pub fn lsblk_command() -> ToolCommand {
    ToolCommand::new("lsblk", "lsblk").args(["-J", "-b", "-o", LSBLK_COLUMNS])
}

/// Enumerate every block device the host reports.
pub fn list_block_devices(
    runner: &dyn ToolRunner,
    privilege: Option<&PrivilegeToken>,
) -> EraseResult<Vec<BlockDevice>> {
    let output = runner.execute(&lsblk_command(), privilege)?;
    if !output.success() {
        return Err(EraseError::ToolExecutionFailed {
            tool: "lsblk".to_string(),
            reason: output.stderr.trim().to_string(),
        });
    }
    parse_lsblk_json(&output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modern_lsblk_with_partitions() {
        let json = r#"{
           "blockdevices": [
              {"name":"sda", "path":"/dev/sda", "size":500107862016, "type":"disk", "mountpoint":null,
               "model":"Samsung SSD 860 ", "serial":"S3Z9NB0K123456", "rota":false, "ro":false,
               "children": [
                  {"name":"sda1", "path":"/dev/sda1", "size":536870912, "type":"part", "mountpoint":"/boot/efi",
                   "model":null, "serial":null, "rota":false, "ro":false}
               ]}
           ]
        }"#;

        let devices = parse_lsblk_json(json).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].path, "/dev/sda");
        assert_eq!(devices[0].model.as_deref(), Some("Samsung SSD 860"));
        assert_eq!(devices[0].rotational, Some(false));
        assert_eq!(devices[0].size, 500_107_862_016);
        assert!(devices[1].is_partition());
        assert_eq!(devices[1].mountpoint.as_deref(), Some("/boot/efi"));
    }

    #[test]
    fn test_parse_legacy_string_encoding() {
        let json = r#"{"blockdevices": [
            {"name":"sdb", "size":"1000204886016", "type":"disk", "mountpoint":null,
             "model":"WDC WD10EZEX", "serial":"WD-WCC6Y0123456", "rota":"1", "ro":"0"}
        ]}"#;

        let devices = parse_lsblk_json(json).unwrap();
        assert_eq!(devices[0].path, "/dev/sdb");
        assert_eq!(devices[0].size, 1_000_204_886_016);
        assert_eq!(devices[0].rotational, Some(true));
        assert!(!devices[0].read_only);
    }

    #[test]
    fn test_parse_missing_optional_columns() {
        let json = r#"{"blockdevices": [{"name":"loop0"}]}"#;
        let devices = parse_lsblk_json(json).unwrap();
        assert_eq!(devices[0].rotational, None);
        assert_eq!(devices[0].size, 0);
        assert_eq!(devices[0].device_type, "disk");
    }

    #[test]
    fn test_parse_garbage_is_an_error() {
        assert!(parse_lsblk_json("not json").is_err());
    }
}
