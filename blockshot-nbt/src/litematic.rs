//! Litematic layout.
//!
//! A litematic root holds `Metadata` and `Regions`. Each region has a
//! `Position`, a `Size` (components may be negative, the region then extends
//! towards the origin), a `BlockStatePalette` and a `BlockStates` long array.
//!
//! Block states are tightly packed: entry `i` occupies bits
//! `i * bits .. (i + 1) * bits` of the array and may span two longs.
//! `bits = max(2, ceil(log2(palette_len)))`.

use std::collections::{BTreeMap, HashMap};

use fastnbt::Value;

use crate::container::TagTree;
use crate::model::{
    BlockState, RawStructure, StructureMetadata, StructureTransform, TransformError, EMPTY,
};

/// Largest grid, in cells, a structure may span (256 x 512 x 512).
pub const MAX_VOLUME: u64 = 1 << 26;

/// Cell count of a `size` grid, rejecting extents that overflow or exceed [`MAX_VOLUME`].
fn checked_volume(size: [i64; 3], what: &str) -> Result<usize, TransformError> {
    let mut volume = 1u64;
    for extent in size {
        let extent = u32::try_from(extent)
            .map_err(|_| TransformError(format!("{what} extent {extent} is out of range")))?;
        volume = volume
            .checked_mul(u64::from(extent))
            .filter(|&v| v <= MAX_VOLUME)
            .ok_or_else(|| {
                TransformError(format!("{what} size {size:?} exceeds {MAX_VOLUME} cells"))
            })?;
    }
    Ok(volume as usize)
}

/// Bits per packed entry for a palette of `len` states.
pub fn bits_for(len: usize) -> u32 {
    let needed = usize::BITS - len.saturating_sub(1).leading_zeros();
    needed.max(2)
}

/// Number of longs holding `count` entries of `bits` bits.
pub fn packed_len(count: usize, bits: u32) -> usize {
    (count * bits as usize).div_ceil(64)
}

/// Pack palette indices into a spanning long array.
pub fn pack(indices: &[u32], bits: u32) -> Vec<i64> {
    let mut data = vec![0u64; packed_len(indices.len(), bits)];
    let mask = (1u64 << bits) - 1;

    for (i, &value) in indices.iter().enumerate() {
        let value = u64::from(value) & mask;
        let start = i * bits as usize;
        let long = start >> 6;
        let offset = (start & 63) as u32;

        data[long] |= value << offset;
        // Spills into the next long
        if offset + bits > 64 {
            data[long + 1] |= value >> (64 - offset);
        }
    }

    data.into_iter().map(|v| v as i64).collect()
}

/// Unpack `count` entries of `bits` bits from a spanning long array.
pub fn unpack(data: &[i64], bits: u32, count: usize) -> Result<Vec<u32>, TransformError> {
    let needed = packed_len(count, bits);
    if data.len() < needed {
        return Err(TransformError(format!(
            "block state array holds {} longs, {count} entries of {bits} bits need {needed}",
            data.len()
        )));
    }

    let mask = (1u64 << bits) - 1;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * bits as usize;
        let long = start >> 6;
        let end_long = (start + bits as usize - 1) >> 6;
        let offset = (start & 63) as u32;

        let low = data[long] as u64 >> offset;
        let value = if long == end_long {
            low & mask
        } else {
            (low | (data[end_long] as u64) << (64 - offset)) & mask
        };
        out.push(value as u32);
    }
    Ok(out)
}

type Compound = HashMap<String, Value>;

fn compound<'a>(value: &'a Value, what: &str) -> Result<&'a Compound, TransformError> {
    match value {
        Value::Compound(map) => Ok(map),
        _ => Err(TransformError(format!("{what} is not a compound"))),
    }
}

fn field<'a>(map: &'a Compound, key: &str, what: &str) -> Result<&'a Value, TransformError> {
    map.get(key)
        .ok_or_else(|| TransformError(format!("{what} has no {key}")))
}

fn int(value: &Value, what: &str) -> Result<i64, TransformError> {
    match value {
        Value::Byte(v) => Ok(i64::from(*v)),
        Value::Short(v) => Ok(i64::from(*v)),
        Value::Int(v) => Ok(i64::from(*v)),
        Value::Long(v) => Ok(*v),
        _ => Err(TransformError(format!("{what} is not an integer"))),
    }
}

fn string(map: &Compound, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn vec3(map: &Compound, key: &str, what: &str) -> Result<[i64; 3], TransformError> {
    let what = format!("{what}.{key}");
    let inner = compound(field(map, key, &what)?, &what)?;
    Ok([
        int(field(inner, "x", &what)?, &what)?,
        int(field(inner, "y", &what)?, &what)?,
        int(field(inner, "z", &what)?, &what)?,
    ])
}

fn block_state(value: &Value, what: &str) -> Result<BlockState, TransformError> {
    let map = compound(value, what)?;
    let name = string(map, "Name").ok_or_else(|| TransformError(format!("{what} has no Name")))?;
    let mut properties = BTreeMap::new();
    if let Some(Value::Compound(props)) = map.get("Properties") {
        for (key, value) in props {
            if let Value::String(v) = value {
                properties.insert(key.clone(), v.clone());
            }
        }
    }
    Ok(BlockState { name, properties })
}

struct Region {
    min: [i64; 3],
    size: [i64; 3],
    palette: Vec<BlockState>,
    indices: Vec<u32>,
}

impl Region {
    fn read(name: &str, value: &Value) -> Result<Self, TransformError> {
        let what = format!("region {name:?}");
        let map = compound(value, &what)?;
        let position = vec3(map, "Position", &what)?;
        let signed = vec3(map, "Size", &what)?;

        let mut min = [0; 3];
        let mut size = [0; 3];
        for axis in 0..3 {
            let out_of_range = || TransformError(format!("{what} extends out of range"));
            size[axis] = signed[axis].checked_abs().ok_or_else(out_of_range)?;
            min[axis] = if signed[axis] < 0 {
                position[axis]
                    .checked_add(signed[axis] + 1)
                    .ok_or_else(out_of_range)?
            } else {
                position[axis]
            };
        }

        let palette = match field(map, "BlockStatePalette", &what)? {
            Value::List(entries) => entries
                .iter()
                .map(|entry| block_state(entry, &format!("{what} palette entry")))
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(TransformError(format!("{what} palette is not a list"))),
        };

        let volume = checked_volume(size, &what)?;
        let indices = match (volume, field(map, "BlockStates", &what)?) {
            (0, _) => Vec::new(),
            (_, Value::LongArray(data)) => unpack(data, bits_for(palette.len()), volume)?,
            _ => return Err(TransformError(format!("{what} block states are not a long array"))),
        };
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= palette.len()) {
            return Err(TransformError(format!(
                "{what} references palette entry {bad} of {}",
                palette.len()
            )));
        }

        Ok(Self {
            min,
            size,
            palette,
            indices,
        })
    }
}

/// Reads litematic tag trees, merging all regions into one enclosing grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct LitematicTransform;

impl StructureTransform for LitematicTransform {
    fn transform(&self, tree: &TagTree) -> Result<RawStructure, TransformError> {
        let root = compound(tree.root(), "root")?;

        let metadata = match root.get("Metadata") {
            Some(Value::Compound(meta)) => StructureMetadata {
                name: string(meta, "Name"),
                author: string(meta, "Author"),
                description: string(meta, "Description"),
            },
            _ => StructureMetadata::default(),
        };

        let mut regions = compound(field(root, "Regions", "root")?, "Regions")?
            .iter()
            .map(|(name, value)| Region::read(name, value))
            .collect::<Result<Vec<_>, _>>()?;
        // HashMap order is arbitrary; later regions overwrite earlier ones on overlap.
        regions.sort_by_key(|r| r.min);

        if regions.is_empty() {
            return Ok(RawStructure {
                size: [0; 3],
                palette: vec![BlockState::air()],
                cells: Vec::new(),
                metadata,
            });
        }

        let mut lo = [i64::MAX; 3];
        let mut hi = [i64::MIN; 3];
        for region in &regions {
            for axis in 0..3 {
                lo[axis] = lo[axis].min(region.min[axis]);
                let end = region.min[axis]
                    .checked_add(region.size[axis])
                    .ok_or_else(|| TransformError("region extends out of range".to_string()))?;
                hi[axis] = hi[axis].max(end);
            }
        }
        let mut size = [0i64; 3];
        for axis in 0..3 {
            size[axis] = hi[axis]
                .checked_sub(lo[axis])
                .ok_or_else(|| TransformError("regions span out of range".to_string()))?;
        }
        let volume = checked_volume(size, "enclosing grid")?;
        let [sx, _, sz] = size;

        let mut palette = vec![BlockState::air()];
        let mut lookup: HashMap<BlockState, u32> = HashMap::new();
        let mut cells = vec![EMPTY; volume];

        for region in &regions {
            // Region palette index -> merged palette index
            let remap: Vec<u32> = region
                .palette
                .iter()
                .map(|state| {
                    if state.is_air() {
                        return EMPTY;
                    }
                    *lookup.entry(state.clone()).or_insert_with(|| {
                        palette.push(state.clone());
                        (palette.len() - 1) as u32
                    })
                })
                .collect();

            let [rx, _, rz] = region.size;
            let offset = [
                region.min[0] - lo[0],
                region.min[1] - lo[1],
                region.min[2] - lo[2],
            ];
            for (i, &index) in region.indices.iter().enumerate() {
                let entry = remap[index as usize];
                if entry == EMPTY {
                    continue;
                }
                let i = i as i64;
                let x = i % rx + offset[0];
                let z = (i / rx) % rz + offset[2];
                let y = i / (rx * rz) + offset[1];
                cells[((y * sz + z) * sx + x) as usize] = entry;
            }
        }

        log::debug!(
            "Litematic {:?}: {} region(s), enclosing size {:?}",
            metadata.name,
            regions.len(),
            size
        );

        Ok(RawStructure {
            size,
            palette,
            cells,
            metadata,
        })
    }
}
