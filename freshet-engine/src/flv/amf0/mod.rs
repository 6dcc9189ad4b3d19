pub mod errors;

use {
    crate::bytesio::{bytes_reader::BytesReader, bytes_writer::BytesWriter},
    byteorder::BigEndian,
    self::errors::{Amf0Error, Amf0ErrorValue},
    std::collections::HashMap,
};

mod marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const LONG_STRING: u8 = 0x0C;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    UTF8String(String),
    Object(HashMap<String, Amf0Value>),
    EcmaArray(HashMap<String, Amf0Value>),
    Null,
    Undefined,
}

impl Amf0Value {
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::UTF8String(s) => Some(s),
            _ => None,
        }
    }

    /// Property lookup across both map-backed shapes.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Amf0Value> {
        match self {
            Self::Object(map) | Self::EcmaArray(map) => map.get(key),
            _ => None,
        }
    }
}

pub struct Amf0Reader;

impl Amf0Reader {
    /// Decode every value remaining in the reader.
    pub fn read_all(reader: &mut BytesReader) -> Result<Vec<Amf0Value>, Amf0Error> {
        let mut values = Vec::new();
        while !reader.is_empty() {
            values.push(Self::read_any(reader)?);
        }
        Ok(values)
    }

    pub fn read_any(reader: &mut BytesReader) -> Result<Amf0Value, Amf0Error> {
        let marker = reader.read_u8()?;
        match marker {
            marker::NUMBER => Ok(Amf0Value::Number(reader.read_f64::<BigEndian>()?)),
            marker::BOOLEAN => Ok(Amf0Value::Boolean(reader.read_u8()? != 0)),
            marker::STRING => Ok(Amf0Value::UTF8String(Self::read_raw_string(reader)?)),
            marker::LONG_STRING => {
                let len = reader.read_u32::<BigEndian>()? as usize;
                let bytes = reader.read_bytes(len)?;
                String::from_utf8(bytes.to_vec())
                    .map(Amf0Value::UTF8String)
                    .map_err(|_| Amf0ErrorValue::InvalidUtf8.into())
            }
            marker::OBJECT => Ok(Amf0Value::Object(Self::read_properties(reader)?)),
            marker::ECMA_ARRAY => {
                let _count = reader.read_u32::<BigEndian>()?;
                Ok(Amf0Value::EcmaArray(Self::read_properties(reader)?))
            }
            marker::NULL => Ok(Amf0Value::Null),
            marker::UNDEFINED => Ok(Amf0Value::Undefined),
            other => Err(Amf0ErrorValue::UnknownMarker(other).into()),
        }
    }

    fn read_properties(
        reader: &mut BytesReader,
    ) -> Result<HashMap<String, Amf0Value>, Amf0Error> {
        let mut properties = HashMap::new();
        loop {
            let key = Self::read_raw_string(reader)?;
            if key.is_empty() && reader.advance_u8()? == marker::OBJECT_END {
                reader.read_u8()?;
                return Ok(properties);
            }
            properties.insert(key, Self::read_any(reader)?);
        }
    }

    fn read_raw_string(reader: &mut BytesReader) -> Result<String, Amf0Error> {
        let len = reader.read_u16::<BigEndian>()? as usize;
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Amf0ErrorValue::InvalidUtf8.into())
    }
}

pub struct Amf0Writer;

impl Amf0Writer {
    pub fn write_any(writer: &mut BytesWriter, value: &Amf0Value) -> Result<(), Amf0Error> {
        match value {
            Amf0Value::Number(n) => Self::write_number(writer, *n),
            Amf0Value::Boolean(b) => Self::write_bool(writer, *b),
            Amf0Value::UTF8String(s) => Self::write_string(writer, s),
            Amf0Value::Object(map) => Self::write_object(writer, map),
            Amf0Value::EcmaArray(map) => Self::write_ecma_array(writer, map),
            Amf0Value::Null => Self::write_null(writer),
            Amf0Value::Undefined => Self::write_undefined(writer),
        }
    }

    pub fn write_number(writer: &mut BytesWriter, value: f64) -> Result<(), Amf0Error> {
        writer.write_u8(marker::NUMBER)?;
        writer.write_f64::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_bool(writer: &mut BytesWriter, value: bool) -> Result<(), Amf0Error> {
        writer.write_u8(marker::BOOLEAN)?;
        writer.write_u8(u8::from(value))?;
        Ok(())
    }

    pub fn write_string(writer: &mut BytesWriter, value: &str) -> Result<(), Amf0Error> {
        writer.write_u8(marker::STRING)?;
        Self::write_raw_string(writer, value)
    }

    pub fn write_null(writer: &mut BytesWriter) -> Result<(), Amf0Error> {
        writer.write_u8(marker::NULL)?;
        Ok(())
    }

    pub fn write_undefined(writer: &mut BytesWriter) -> Result<(), Amf0Error> {
        writer.write_u8(marker::UNDEFINED)?;
        Ok(())
    }

    pub fn write_object(
        writer: &mut BytesWriter,
        properties: &HashMap<String, Amf0Value>,
    ) -> Result<(), Amf0Error> {
        writer.write_u8(marker::OBJECT)?;
        Self::write_properties(writer, properties)
    }

    pub fn write_ecma_array(
        writer: &mut BytesWriter,
        properties: &HashMap<String, Amf0Value>,
    ) -> Result<(), Amf0Error> {
        writer.write_u8(marker::ECMA_ARRAY)?;
        writer.write_u32::<BigEndian>(properties.len() as u32)?;
        Self::write_properties(writer, properties)
    }

    fn write_properties(
        writer: &mut BytesWriter,
        properties: &HashMap<String, Amf0Value>,
    ) -> Result<(), Amf0Error> {
        let mut keys: Vec<_> = properties.keys().collect();
        keys.sort();
        for key in keys {
            Self::write_raw_string(writer, key)?;
            Self::write_any(writer, &properties[key])?;
        }
        Self::write_raw_string(writer, "")?;
        writer.write_u8(marker::OBJECT_END)?;
        Ok(())
    }

    fn write_raw_string(writer: &mut BytesWriter, value: &str) -> Result<(), Amf0Error> {
        writer.write_u16::<BigEndian>(value.len() as u16)?;
        writer.write(value.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_roundtrip_command_shape() {
        let mut writer = BytesWriter::new();
        Amf0Writer::write_string(&mut writer, "connect").unwrap();
        Amf0Writer::write_number(&mut writer, 1.0).unwrap();
        let mut object = HashMap::new();
        object.insert("app".to_string(), Amf0Value::UTF8String("live".to_string()));
        object.insert(
            "tcUrl".to_string(),
            Amf0Value::UTF8String("rtmp://host/live".to_string()),
        );
        Amf0Writer::write_object(&mut writer, &object).unwrap();
        Amf0Writer::write_null(&mut writer).unwrap();

        let mut reader = BytesReader::new(BytesMut::from(&writer.get_current_bytes()[..]));
        let values = Amf0Reader::read_all(&mut reader).unwrap();

        assert_eq!(values.len(), 4);
        assert_eq!(values[0].as_str(), Some("connect"));
        assert_eq!(values[1].as_number(), Some(1.0));
        assert_eq!(
            values[2].property("app").and_then(Amf0Value::as_str),
            Some("live")
        );
        assert_eq!(values[3], Amf0Value::Null);
    }

    #[test]
    fn test_ecma_array_roundtrip() {
        let mut writer = BytesWriter::new();
        let mut map = HashMap::new();
        map.insert("width".to_string(), Amf0Value::Number(1920.0));
        map.insert("height".to_string(), Amf0Value::Number(1080.0));
        Amf0Writer::write_ecma_array(&mut writer, &map).unwrap();

        let mut reader = BytesReader::new(BytesMut::from(&writer.get_current_bytes()[..]));
        let value = Amf0Reader::read_any(&mut reader).unwrap();
        assert_eq!(
            value.property("width").and_then(Amf0Value::as_number),
            Some(1920.0)
        );
    }
}
