use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Name of the persisted block descriptor. Its presence marks a block readable.
pub const META_NAME: &str = "meta.json";

/// Compression codec applied to a block's data pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    None,
    Gzip,
    Snappy,
    Zstd,
    Lz4,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::None => "none",
            Encoding::Gzip => "gzip",
            Encoding::Snappy => "snappy",
            Encoding::Zstd => "zstd",
            Encoding::Lz4 => "lz4",
        };
        f.write_str(name)
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(Encoding::None),
            "gzip" => Ok(Encoding::Gzip),
            "snappy" => Ok(Encoding::Snappy),
            "zstd" => Ok(Encoding::Zstd),
            "lz4" => Ok(Encoding::Lz4),
            other => Err(format!("unknown encoding '{}'", other)),
        }
    }
}

/// Durable descriptor of a block, written last when a block is completed and
/// read first when a block is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    /// Block format version
    pub version: String,

    #[serde(rename = "blockID")]
    pub block_id: Uuid,

    #[serde(rename = "tenantID")]
    pub tenant_id: String,

    /// Smallest trace id in the block, hex encoded
    #[serde(rename = "minID", default)]
    pub min_id: String,

    /// Largest trace id in the block, hex encoded
    #[serde(rename = "maxID", default)]
    pub max_id: String,

    /// Earliest trace start observed
    pub start_time: DateTime<Utc>,

    /// Latest trace end (start + duration) observed
    pub end_time: DateTime<Utc>,

    /// Number of traces in the block
    pub total_objects: u64,

    /// Size of the data object in bytes
    pub size: u64,

    /// Compression codec of the data object
    pub encoding: Encoding,

    /// Layout of the data object
    #[serde(default)]
    pub data_encoding: String,

    /// Number of persisted bloom shards
    #[serde(rename = "bloomShards", default)]
    pub bloom_shard_count: u32,

    /// Target false positive rate the bloom shards were built for
    #[serde(rename = "bloomFP", default)]
    pub bloom_fp: f64,

    /// Byte budget each bloom shard was sized against
    #[serde(default)]
    pub bloom_shard_size_bytes: u64,
}

impl BlockMeta {
    /// Create an empty meta for a block that is about to be written
    pub fn new(
        tenant_id: impl Into<String>,
        block_id: Uuid,
        version: impl Into<String>,
        encoding: Encoding,
        data_encoding: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            block_id,
            tenant_id: tenant_id.into(),
            min_id: String::new(),
            max_id: String::new(),
            start_time: DateTime::<Utc>::default(),
            end_time: DateTime::<Utc>::default(),
            total_objects: 0,
            size: 0,
            encoding,
            data_encoding: data_encoding.into(),
            bloom_shard_count: 0,
            bloom_fp: 0.0,
            bloom_shard_size_bytes: 0,
        }
    }

    /// Record an object added to the block. Times are unix nanoseconds.
    pub fn object_added(&mut self, id: &[u8], start_unix_nano: u64, end_unix_nano: u64) {
        let start = nanos_to_time(start_unix_nano);
        let end = nanos_to_time(end_unix_nano);

        if self.total_objects == 0 || start < self.start_time {
            self.start_time = start;
        }
        if self.total_objects == 0 || end > self.end_time {
            self.end_time = end;
        }

        let id_hex = hex::encode(id);
        // Equal-length hex strings order the same way as their bytes.
        if self.total_objects == 0 || less(&id_hex, &self.min_id) {
            self.min_id = id_hex.clone();
        }
        if self.total_objects == 0 || less(&self.max_id, &id_hex) {
            self.max_id = id_hex;
        }

        self.total_objects += 1;
    }

    /// Object path of a named file of this block: `<tenant>/<block>/<name>`
    pub fn object_path(&self, name: &str) -> String {
        object_path(&self.tenant_id, self.block_id, name)
    }
}

/// Object path of a named file of a block: `<tenant>/<block>/<name>`
pub fn object_path(tenant_id: &str, block_id: Uuid, name: &str) -> String {
    format!("{}/{}/{}", tenant_id, block_id, name)
}

fn nanos_to_time(nanos: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_nanos(i64::try_from(nanos).unwrap_or(i64::MAX))
}

fn less(a: &str, b: &str) -> bool {
    (a.len(), a) < (b.len(), b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_added_tracks_ranges() {
        let mut meta = BlockMeta::new("tenant", Uuid::new_v4(), "vParquet", Encoding::None, "");

        meta.object_added(&[0x05], 2_000_000_000, 3_000_000_000);
        meta.object_added(&[0x01], 1_000_000_000, 1_500_000_000);
        meta.object_added(&[0x09], 4_000_000_000, 4_100_000_000);

        assert_eq!(meta.total_objects, 3);
        assert_eq!(meta.min_id, "01");
        assert_eq!(meta.max_id, "09");
        assert_eq!(meta.start_time.timestamp(), 1);
        assert_eq!(meta.end_time.timestamp_nanos_opt(), Some(4_100_000_000));
    }

    #[test]
    fn test_json_round_trip_uses_tempo_field_names() {
        let mut meta = BlockMeta::new("single-tenant", Uuid::new_v4(), "vParquet", Encoding::Zstd, "vParquet");
        meta.object_added(&[0xab, 0xcd], 10, 20);
        meta.bloom_shard_count = 2;

        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("blockID").is_some());
        assert!(json.get("tenantID").is_some());
        assert!(json.get("startTime").is_some());
        assert!(json.get("totalObjects").is_some());
        assert_eq!(json["bloomShards"], 2);
        assert_eq!(json["encoding"], "zstd");

        let decoded: BlockMeta = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("snappy".parse::<Encoding>().unwrap(), Encoding::Snappy);
        assert_eq!("none".parse::<Encoding>().unwrap(), Encoding::None);
        assert!("brotli".parse::<Encoding>().is_err());
        assert_eq!(Encoding::Lz4.to_string(), "lz4");
    }

    #[test]
    fn test_object_path() {
        let id = Uuid::nil();
        assert_eq!(
            object_path("test-tenant", id, "data.parquet"),
            "test-tenant/00000000-0000-0000-0000-000000000000/data.parquet"
        );
    }
}
