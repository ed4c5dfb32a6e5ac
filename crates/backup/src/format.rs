//! Binary codec for a single backup file (spec §4.5 "File layout").
//!
//! ```text
//! u8  version (= 0)
//! u8  type-code  ('t'|'b'|'n'|'s'|'j')
//! u32 record-count
//! record[] (oldest first):
//!   f64 timestamp
//!   trigger : (nothing)
//!   boolean : u8 (0|1)
//!   numeric : f64
//!   string  : u32 length, length bytes (no terminator)
//!   json    : u32 length, length bytes (no terminator)
//! ```
//! All integers and floats are little-endian.

use std::io::{self, Read, Write};

use hub_core::{DataSample, DataType, HubError, HubResult};

const VERSION: u8 = 0;

fn type_code(t: DataType) -> u8 {
    match t {
        DataType::Trigger => b't',
        DataType::Boolean => b'b',
        DataType::Numeric => b'n',
        DataType::String => b's',
        DataType::Json => b'j',
    }
}

fn type_from_code(code: u8) -> HubResult<DataType> {
    match code {
        b't' => Ok(DataType::Trigger),
        b'b' => Ok(DataType::Boolean),
        b'n' => Ok(DataType::Numeric),
        b's' => Ok(DataType::String),
        b'j' => Ok(DataType::Json),
        other => Err(HubError::Malformed(format!(
            "unknown backup type code {other:#04x}"
        ))),
    }
}

/// Encode `samples` (assumed to all be of `data_type`, oldest first) into
/// `writer`.
pub fn encode(
    writer: &mut impl Write,
    data_type: DataType,
    samples: &[DataSample],
) -> HubResult<()> {
    writer.write_all(&[VERSION])?;
    writer.write_all(&[type_code(data_type)])?;
    writer.write_all(&(samples.len() as u32).to_le_bytes())?;

    for sample in samples {
        writer.write_all(&sample.timestamp().to_le_bytes())?;
        match data_type {
            DataType::Trigger => {}
            DataType::Boolean => {
                let b = sample.as_bool().ok_or_else(|| {
                    HubError::Fatal("buffered sample type disagrees with bufferedType".into())
                })?;
                writer.write_all(&[b as u8])?;
            }
            DataType::Numeric => {
                let n = sample.as_numeric().ok_or_else(|| {
                    HubError::Fatal("buffered sample type disagrees with bufferedType".into())
                })?;
                writer.write_all(&n.to_le_bytes())?;
            }
            DataType::String => {
                let s = sample.as_str().ok_or_else(|| {
                    HubError::Fatal("buffered sample type disagrees with bufferedType".into())
                })?;
                write_bytes(writer, s.as_bytes())?;
            }
            DataType::Json => {
                let s = sample.as_json_text().ok_or_else(|| {
                    HubError::Fatal("buffered sample type disagrees with bufferedType".into())
                })?;
                write_bytes(writer, s.as_bytes())?;
            }
        }
    }
    Ok(())
}

fn write_bytes(writer: &mut impl Write, bytes: &[u8]) -> HubResult<()> {
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Decode a full backup file. Returns the buffered type and its records,
/// oldest first. Fails cleanly (`Underflow`) on truncated input and
/// (`Malformed`) on an unsupported version or type code.
pub fn decode(reader: &mut impl Read) -> HubResult<(DataType, Vec<DataSample>)> {
    let version = read_u8(reader)?;
    if version != VERSION {
        return Err(HubError::Malformed(format!(
            "unsupported backup version {version}"
        )));
    }
    let data_type = type_from_code(read_u8(reader)?)?;
    let count = read_u32(reader)? as usize;

    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let ts = read_f64(reader)?;
        let sample = match data_type {
            DataType::Trigger => DataSample::trigger(ts),
            DataType::Boolean => DataSample::boolean(ts, read_u8(reader)? != 0),
            DataType::Numeric => DataSample::numeric(ts, read_f64(reader)?),
            DataType::String => {
                let bytes = read_bytes(reader)?;
                let s = String::from_utf8(bytes)
                    .map_err(|e| HubError::Malformed(format!("invalid UTF-8 in record: {e}")))?;
                DataSample::string(ts, s)
            }
            DataType::Json => {
                let bytes = read_bytes(reader)?;
                let s = String::from_utf8(bytes)
                    .map_err(|e| HubError::Malformed(format!("invalid UTF-8 in record: {e}")))?;
                DataSample::json(ts, s)?
            }
        };
        samples.push(sample);
    }
    Ok((data_type, samples))
}

fn read_u8(reader: &mut impl Read) -> HubResult<u8> {
    let mut buf = [0u8; 1];
    read_exact_mapped(reader, &mut buf)?;
    Ok(buf[0])
}

fn read_u32(reader: &mut impl Read) -> HubResult<u32> {
    let mut buf = [0u8; 4];
    read_exact_mapped(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f64(reader: &mut impl Read) -> HubResult<f64> {
    let mut buf = [0u8; 8];
    read_exact_mapped(reader, &mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_bytes(reader: &mut impl Read) -> HubResult<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut buf = vec![0u8; len];
    read_exact_mapped(reader, &mut buf)?;
    Ok(buf)
}

fn read_exact_mapped(reader: &mut impl Read, buf: &mut [u8]) -> HubResult<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(HubError::Underflow("truncated backup file".into()))
        }
        Err(e) => Err(HubError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_string_records() {
        let samples = vec![DataSample::string(1.0, "a"), DataSample::string(2.0, "b")];
        let mut buf = Vec::new();
        encode(&mut buf, DataType::String, &samples).unwrap();

        let (data_type, decoded) = decode(&mut &buf[..]).unwrap();
        assert_eq!(data_type, DataType::String);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn round_trips_numeric_and_boolean_and_trigger() {
        for (dt, samples) in [
            (
                DataType::Numeric,
                vec![DataSample::numeric(1.0, 1.5), DataSample::numeric(2.0, -3.0)],
            ),
            (
                DataType::Boolean,
                vec![DataSample::boolean(1.0, true), DataSample::boolean(2.0, false)],
            ),
            (
                DataType::Trigger,
                vec![DataSample::trigger(1.0), DataSample::trigger(2.0)],
            ),
        ] {
            let mut buf = Vec::new();
            encode(&mut buf, dt, &samples).unwrap();
            let (decoded_type, decoded) = decode(&mut &buf[..]).unwrap();
            assert_eq!(decoded_type, dt);
            assert_eq!(decoded, samples);
        }
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = vec![7u8, b'n', 0, 0, 0, 0];
        assert!(matches!(
            decode(&mut &buf[..]),
            Err(HubError::Malformed(_))
        ));
        buf.clear();
    }

    #[test]
    fn rejects_truncated_file() {
        let samples = vec![DataSample::numeric(1.0, 1.0)];
        let mut buf = Vec::new();
        encode(&mut buf, DataType::Numeric, &samples).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            decode(&mut &buf[..]),
            Err(HubError::Underflow(_))
        ));
    }
}
