//! Decoding of serialized sigma constants found in box registers R4..R9

/// A register value decoded into a type name and a display string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRegister {
    pub value_type: String,
    pub rendered: String,
}

const TYPE_BOOLEAN: u8 = 0x01;
const TYPE_BYTE: u8 = 0x02;
const TYPE_SHORT: u8 = 0x03;
const TYPE_INT: u8 = 0x04;
const TYPE_LONG: u8 = 0x05;
const TYPE_BIGINT: u8 = 0x06;
const TYPE_GROUP_ELEMENT: u8 = 0x07;
const TYPE_SIGMA_PROP: u8 = 0x08;
const COLL_OFFSET: u8 = 0x0c;
const NESTED_COLL_OFFSET: u8 = 0x18;

const PROVE_DLOG: u8 = 0xcd;
const GROUP_ELEMENT_LEN: usize = 33;

/// Decode a serialized constant, falling back to the raw hex when the
/// type is not one we render.
pub fn render(serialized: &str) -> RenderedRegister {
    decode(serialized).unwrap_or_else(|| RenderedRegister {
        value_type: "Unknown".to_string(),
        rendered: serialized.to_string(),
    })
}

fn decode(serialized: &str) -> Option<RenderedRegister> {
    let bytes = hex::decode(serialized).ok()?;
    let mut reader = Reader::new(&bytes);
    let type_code = reader.byte()?;

    let (value_type, rendered) = match type_code {
        TYPE_BOOLEAN..=TYPE_SIGMA_PROP => {
            let value = read_primitive(&mut reader, type_code)?;
            (primitive_name(type_code)?.to_string(), value)
        }
        code if code == COLL_OFFSET + TYPE_BYTE => {
            let len = reader.vlq()? as usize;
            let data = reader.take(len)?;
            ("Coll[SByte]".to_string(), hex::encode(data))
        }
        code if code > COLL_OFFSET && code <= COLL_OFFSET + TYPE_SIGMA_PROP => {
            let elem = code - COLL_OFFSET;
            if elem == TYPE_BOOLEAN {
                return None;
            }
            let len = reader.vlq()? as usize;
            let items = (0..len)
                .map(|_| read_primitive(&mut reader, elem))
                .collect::<Option<Vec<_>>>()?;
            (
                format!("Coll[{}]", primitive_name(elem)?),
                format!("[{}]", items.join(",")),
            )
        }
        code if code == NESTED_COLL_OFFSET + TYPE_BYTE => {
            let outer = reader.vlq()? as usize;
            let mut items = Vec::with_capacity(outer);
            for _ in 0..outer {
                let len = reader.vlq()? as usize;
                items.push(hex::encode(reader.take(len)?));
            }
            ("Coll[Coll[SByte]]".to_string(), format!("[{}]", items.join(",")))
        }
        _ => return None,
    };

    Some(RenderedRegister {
        value_type,
        rendered,
    })
}

fn primitive_name(type_code: u8) -> Option<&'static str> {
    Some(match type_code {
        TYPE_BOOLEAN => "SBoolean",
        TYPE_BYTE => "SByte",
        TYPE_SHORT => "SShort",
        TYPE_INT => "SInt",
        TYPE_LONG => "SLong",
        TYPE_BIGINT => "SBigInt",
        TYPE_GROUP_ELEMENT => "SGroupElement",
        TYPE_SIGMA_PROP => "SSigmaProp",
        _ => return None,
    })
}

fn read_primitive(reader: &mut Reader<'_>, type_code: u8) -> Option<String> {
    match type_code {
        TYPE_BOOLEAN => Some((reader.byte()? != 0).to_string()),
        TYPE_BYTE => Some((reader.byte()? as i8).to_string()),
        TYPE_SHORT | TYPE_INT | TYPE_LONG => Some(zigzag_decode(reader.vlq()?).to_string()),
        TYPE_BIGINT => {
            let len = reader.vlq()? as usize;
            let data = reader.take(len)?;
            // Values beyond i128 are kept as hex
            if len <= 16 {
                Some(be_signed(data).to_string())
            } else {
                Some(hex::encode(data))
            }
        }
        TYPE_GROUP_ELEMENT => Some(hex::encode(reader.take(GROUP_ELEMENT_LEN)?)),
        TYPE_SIGMA_PROP => {
            if reader.byte()? != PROVE_DLOG {
                return None;
            }
            Some(hex::encode(reader.take(GROUP_ELEMENT_LEN)?))
        }
        _ => None,
    }
}

fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

fn be_signed(data: &[u8]) -> i128 {
    if data.is_empty() {
        return 0;
    }
    let negative = data[0] & 0x80 != 0;
    let mut value: i128 = if negative { -1 } else { 0 };
    for &b in data {
        value = (value << 8) | b as i128;
    }
    value
}

/// Decode a Coll[Byte] constant holding UTF-8 text (EIP-4 name and description)
pub fn decode_utf8(serialized: &str) -> Option<String> {
    let bytes = hex::decode(serialized).ok()?;
    let mut reader = Reader::new(&bytes);
    if reader.byte()? != COLL_OFFSET + TYPE_BYTE {
        return None;
    }
    let len = reader.vlq()? as usize;
    String::from_utf8(reader.take(len)?.to_vec()).ok()
}

/// Decode EIP-4 decimals, stored either as UTF-8 digits or as an Int/Long
pub fn decode_decimals(serialized: &str) -> Option<i32> {
    let bytes = hex::decode(serialized).ok()?;
    let mut reader = Reader::new(&bytes);
    match reader.byte()? {
        TYPE_INT | TYPE_LONG => i32::try_from(zigzag_decode(reader.vlq()?)).ok(),
        code if code == COLL_OFFSET + TYPE_BYTE => decode_utf8(serialized)?.trim().parse().ok(),
        _ => None,
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Decode a VLQ encoded integer
    fn vlq(&mut self) -> Option<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.byte()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Some(value);
            }
            shift += 7;
            if shift > 63 {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_int_and_long() {
        // SInt 1 -> zigzag 2
        assert_eq!(
            render("0402"),
            RenderedRegister {
                value_type: "SInt".into(),
                rendered: "1".into()
            }
        );
        // SLong -1 -> zigzag 1
        assert_eq!(render("0501").rendered, "-1");
        assert_eq!(render("0580a4e803").rendered, "4000000");
    }

    #[test]
    fn renders_byte_collections() {
        let r = render("0e03616263");
        assert_eq!(r.value_type, "Coll[SByte]");
        assert_eq!(r.rendered, "616263");

        let nested = render("1a0201aa02bbcc");
        assert_eq!(nested.value_type, "Coll[Coll[SByte]]");
        assert_eq!(nested.rendered, "[aa,bbcc]");
    }

    #[test]
    fn renders_int_collection() {
        let r = render("1003020406");
        assert_eq!(r.value_type, "Coll[SInt]");
        assert_eq!(r.rendered, "[1,2,3]");
    }

    #[test]
    fn renders_sigma_prop() {
        let pk = "02".repeat(33);
        let r = render(&format!("08cd{pk}"));
        assert_eq!(r.value_type, "SSigmaProp");
        assert_eq!(r.rendered, pk);
    }

    #[test]
    fn unknown_types_keep_serialized_value() {
        let r = render("ff00");
        assert_eq!(r.value_type, "Unknown");
        assert_eq!(r.rendered, "ff00");
        // truncated payload
        assert_eq!(render("0e05ab").value_type, "Unknown");
    }

    #[test]
    fn token_metadata() {
        assert_eq!(decode_utf8("0e0474657374"), Some("test".to_string()));
        assert_eq!(decode_decimals("0e0132"), Some(2));
        assert_eq!(decode_decimals("0404"), Some(2));
        assert_eq!(decode_decimals("0101"), None);
    }
}
