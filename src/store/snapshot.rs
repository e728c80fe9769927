//! Snapshots and the Snapshot Wire Format
//!
//! A snapshot is the deterministic serialization of the store: applying
//! it reproduces the store bit-exact, including the id allocator and the
//! RNG stream position. Entity types flagged `sync_none` never appear.
//!
//! Wire layout (versioned, little-endian):
//!
//! ```text
//! i8  version
//! u32 frame
//! u32 seq
//! u8  post_tick
//! u32 entity_count
//! entity_count × [u32 id, u16 type_idx, i32 client_interned_or_-1]
//! per component (registration order):
//!   per field (declaration order):
//!     entity_count × scalar (entities lacking the component encode zero)
//! u8  domain_count
//! domain_count × [u16 name_len, name bytes,
//!                 u16 n, n × (u16 len, bytes, u32 id)]
//! u32 rng_s0, u32 rng_s1
//! u32 next_index, u32 free_count, free_count × u32,
//! u16 gen_count, gen_count × u16
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

use super::component::{ComponentDef, Value};
use super::entity::AllocatorState;

/// Current snapshot wire version.
pub const SNAPSHOT_VERSION: i8 = 1;

/// Metadata of one serialized entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Raw entity id.
    pub id: u32,
    /// Entity-type registration index.
    pub type_idx: u16,
    /// Interned client id, or -1 when unowned.
    pub client: i32,
}

/// Decoded snapshot of the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Frame the snapshot was taken at.
    pub frame: u32,
    /// Monotonic emission sequence number.
    pub seq: u32,
    /// Whether the snapshot was taken after the tick for `frame`
    /// completed (resume at `frame + 1`) or before it (resume at `frame`).
    pub post_tick: bool,
    /// Entity metadata in ascending id order.
    pub entities: Vec<EntityMeta>,
    /// Column data: `[component][field][entity position]`, components in
    /// registration order, fields in declaration order, positions
    /// parallel to `entities`. Entities lacking a component hold zeros.
    pub columns: Vec<Vec<Vec<Value>>>,
    /// Interned string tables: (domain, entries in id order).
    pub string_tables: Vec<(String, Vec<(String, u32)>)>,
    /// PRNG state words.
    pub rng_state: (u32, u32),
    /// Id-allocator state.
    pub allocator: AllocatorState,
}

impl Snapshot {
    /// Frame a receiver resumes simulation at.
    pub fn resume_frame(&self) -> u32 {
        if self.post_tick {
            self.frame + 1
        } else {
            self.frame
        }
    }

    /// Encode to the versioned wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.push(SNAPSHOT_VERSION as u8);
        out.extend_from_slice(&self.frame.to_le_bytes());
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.push(self.post_tick as u8);
        out.extend_from_slice(&(self.entities.len() as u32).to_le_bytes());

        for meta in &self.entities {
            out.extend_from_slice(&meta.id.to_le_bytes());
            out.extend_from_slice(&meta.type_idx.to_le_bytes());
            out.extend_from_slice(&meta.client.to_le_bytes());
        }

        for component in &self.columns {
            for field in component {
                for value in field {
                    value.encode_le(&mut out);
                }
            }
        }

        out.push(self.string_tables.len() as u8);
        for (domain, entries) in &self.string_tables {
            out.extend_from_slice(&(domain.len() as u16).to_le_bytes());
            out.extend_from_slice(domain.as_bytes());
            out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for (value, id) in entries {
                out.extend_from_slice(&(value.len() as u16).to_le_bytes());
                out.extend_from_slice(value.as_bytes());
                out.extend_from_slice(&id.to_le_bytes());
            }
        }

        out.extend_from_slice(&self.rng_state.0.to_le_bytes());
        out.extend_from_slice(&self.rng_state.1.to_le_bytes());

        out.extend_from_slice(&self.allocator.next_index.to_le_bytes());
        out.extend_from_slice(&(self.allocator.free_list.len() as u32).to_le_bytes());
        for idx in &self.allocator.free_list {
            out.extend_from_slice(&idx.to_le_bytes());
        }
        out.extend_from_slice(&(self.allocator.generations.len() as u16).to_le_bytes());
        for generation in &self.allocator.generations {
            out.extend_from_slice(&generation.to_le_bytes());
        }

        out
    }

    /// Decode from wire bytes. `components` supplies the field types and
    /// must be the registration-ordered schema both sides share.
    pub fn decode(bytes: &[u8], components: &[ComponentDef]) -> EngineResult<Snapshot> {
        let mut r = Reader::new(bytes);

        let version = r.u8()? as i8;
        if version != SNAPSHOT_VERSION {
            return Err(EngineError::Protocol(format!(
                "snapshot version mismatch: got {}, expected {}",
                version, SNAPSHOT_VERSION
            )));
        }

        let frame = r.u32()?;
        let seq = r.u32()?;
        let post_tick = match r.u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(EngineError::Protocol(format!(
                    "bad post_tick byte {}",
                    other
                )))
            }
        };

        let entity_count = r.u32()? as usize;
        let mut entities = Vec::with_capacity(entity_count);
        let mut prev_id: Option<u32> = None;
        for _ in 0..entity_count {
            let id = r.u32()?;
            let type_idx = r.u16()?;
            let client = r.u32()? as i32;
            if prev_id.is_some_and(|p| p >= id) {
                return Err(EngineError::Protocol(
                    "snapshot entities not in ascending id order".into(),
                ));
            }
            prev_id = Some(id);
            entities.push(EntityMeta {
                id,
                type_idx,
                client,
            });
        }

        let mut columns = Vec::with_capacity(components.len());
        for component in components {
            let mut fields = Vec::with_capacity(component.fields.len());
            for field in &component.fields {
                let mut values = Vec::with_capacity(entity_count);
                for _ in 0..entity_count {
                    values.push(Value::decode_le(field.ty, bytes, &mut r.offset)?);
                }
                fields.push(values);
            }
            columns.push(fields);
        }

        let domain_count = r.u8()? as usize;
        let mut string_tables = Vec::with_capacity(domain_count);
        for _ in 0..domain_count {
            let domain = r.string()?;
            let n = r.u16()? as usize;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let value = r.string()?;
                let id = r.u32()?;
                entries.push((value, id));
            }
            string_tables.push((domain, entries));
        }

        let rng_state = (r.u32()?, r.u32()?);

        let next_index = r.u32()?;
        let free_count = r.u32()? as usize;
        let mut free_list = Vec::with_capacity(free_count);
        for _ in 0..free_count {
            free_list.push(r.u32()?);
        }
        let gen_count = r.u16()? as usize;
        let mut generations = Vec::with_capacity(gen_count);
        for _ in 0..gen_count {
            generations.push(r.u16()?);
        }

        if r.offset != bytes.len() {
            return Err(EngineError::Protocol(format!(
                "{} trailing bytes after snapshot",
                bytes.len() - r.offset
            )));
        }

        Ok(Snapshot {
            frame,
            seq,
            post_tick,
            entities,
            columns,
            string_tables,
            rng_state,
            allocator: AllocatorState {
                next_index,
                free_list,
                generations,
            },
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        let end = self.offset + n;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or_else(|| EngineError::Protocol("truncated snapshot".into()))?;
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> EngineResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> EngineResult<u16> {
        let s = self.take(2)?;
        Ok(u16::from_le_bytes([s[0], s[1]]))
    }

    fn u32(&mut self) -> EngineResult<u32> {
        let s = self.take(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn string(&mut self) -> EngineResult<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| EngineError::Protocol("non-utf8 string in snapshot".into()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::component::FieldDef;

    fn schema() -> Vec<ComponentDef> {
        vec![
            ComponentDef {
                name: "Transform2D".into(),
                index: 0,
                fields: vec![FieldDef::fixed("x", 0), FieldDef::fixed("y", 0)],
            },
            ComponentDef {
                name: "Health".into(),
                index: 1,
                fields: vec![FieldDef::new("hp", Value::U16(100))],
            },
        ]
    }

    fn sample() -> Snapshot {
        Snapshot {
            frame: 42,
            seq: 7,
            post_tick: true,
            entities: vec![
                EntityMeta {
                    id: 0,
                    type_idx: 0,
                    client: 0,
                },
                EntityMeta {
                    id: 1,
                    type_idx: 1,
                    client: -1,
                },
            ],
            columns: vec![
                vec![
                    vec![Value::I32(65536), Value::I32(0)],
                    vec![Value::I32(-65536), Value::I32(0)],
                ],
                vec![vec![Value::U16(0), Value::U16(85)]],
            ],
            string_tables: vec![(
                "clientId".into(),
                vec![("alice".into(), 0), ("bob".into(), 1)],
            )],
            rng_state: (0xDEAD, 0xBEEF),
            allocator: AllocatorState {
                next_index: 2,
                free_list: vec![],
                generations: vec![0, 0],
            },
        }
    }

    #[test]
    fn test_wire_roundtrip() {
        let snapshot = sample();
        let bytes = snapshot.encode();
        let decoded = Snapshot::decode(&bytes, &schema()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_resume_frame() {
        let mut s = sample();
        assert!(s.post_tick);
        assert_eq!(s.resume_frame(), 43);
        s.post_tick = false;
        assert_eq!(s.resume_frame(), 42);
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = sample().encode();
        bytes[0] = 99;
        let err = Snapshot::decode(&bytes, &schema()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }

    #[test]
    fn test_truncation_detected() {
        let bytes = sample().encode();
        for cut in [1, 8, bytes.len() / 2, bytes.len() - 1] {
            assert!(
                Snapshot::decode(&bytes[..cut], &schema()).is_err(),
                "cut at {} must fail",
                cut
            );
        }
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let mut bytes = sample().encode();
        bytes.push(0);
        assert!(Snapshot::decode(&bytes, &schema()).is_err());
    }

    #[test]
    fn test_unordered_entities_rejected() {
        let mut snapshot = sample();
        snapshot.entities.swap(0, 1);
        // columns stay positional; only the id order check should trip
        let bytes = snapshot.encode();
        assert!(Snapshot::decode(&bytes, &schema()).is_err());
    }

    #[test]
    fn test_empty_snapshot_roundtrip() {
        let snapshot = Snapshot {
            frame: 0,
            seq: 0,
            post_tick: false,
            entities: vec![],
            columns: vec![vec![vec![], vec![]], vec![vec![]]],
            string_tables: vec![],
            rng_state: (1, 2),
            allocator: AllocatorState {
                next_index: 0,
                free_list: vec![],
                generations: vec![],
            },
        };
        let decoded = Snapshot::decode(&snapshot.encode(), &schema()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_scalar_widths_on_wire() {
        // 1 entity: header(1+4+4+1+4=14) + meta(4+2+4=10)
        // + Transform2D 2×i32(8) + Health u16(2)
        // + domains(1) + rng(8) + allocator(4+4+2+2)
        let snapshot = Snapshot {
            frame: 1,
            seq: 1,
            post_tick: false,
            entities: vec![EntityMeta {
                id: 5,
                type_idx: 0,
                client: -1,
            }],
            columns: vec![
                vec![vec![Value::I32(1)], vec![Value::I32(2)]],
                vec![vec![Value::U16(3)]],
            ],
            string_tables: vec![],
            rng_state: (0, 0),
            allocator: AllocatorState {
                next_index: 6,
                free_list: vec![],
                generations: vec![0],
            },
        };
        assert_eq!(snapshot.encode().len(), 14 + 10 + 8 + 2 + 1 + 8 + 12);
    }
}
