use super::*;

pub const IPS_MAGIC: &[u8; 5] = b"PATCH";
const IPS_EOF: u32 = 0x45_4F_46;
const EXTERN_RECORD: u32 = 1;
const GLOBAL_RECORD: u32 = 2;
const MAX_RECORD: usize = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpsRecord {
    Data { address: u32, bytes: Vec<u8> },
    Rle { address: u32, count: u16, value: u8 },
    /// A site of `size` bytes that must receive the value of `name`.
    Extern { name: String, address: u32, size: u8 },
    Global { name: String, address: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpsPatch {
    pub records: Vec<IpsRecord>,
}

impl IpsPatch {
    /// Adds data records for `bytes` at `address`, splitting long runs.
    pub fn add_data(&mut self, address: u32, bytes: &[u8]) {
        for (index, chunk) in bytes.chunks(MAX_RECORD).enumerate() {
            self.records.push(IpsRecord::Data {
                address: address + (index * MAX_RECORD) as u32,
                bytes: chunk.to_vec(),
            });
        }
    }

    pub fn add_extern(&mut self, name: &str, address: u32, size: u8) {
        self.records.push(IpsRecord::Extern {
            name: name.to_string(),
            address,
            size,
        });
    }

    pub fn add_global(&mut self, name: &str, address: u32) {
        self.records.push(IpsRecord::Global {
            name: name.to_string(),
            address,
        });
    }

    /// Data records expanded to `(address, bytes)`, with RLE runs unpacked.
    pub fn lumps(&self) -> Vec<(u32, Vec<u8>)> {
        self.records
            .iter()
            .filter_map(|record| match record {
                IpsRecord::Data { address, bytes } => Some((*address, bytes.clone())),
                IpsRecord::Rle {
                    address,
                    count,
                    value,
                } => Some((*address, vec![*value; usize::from(*count)])),
                _ => None,
            })
            .collect()
    }
}

fn write_u24_be(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes()[1..]);
}

fn write_u24_le(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

fn check_data_address(address: u32) -> Result<()> {
    if address > 0xFF_FFFF {
        bail!("IPS address {address:#X} does not fit in 24 bits");
    }
    if matches!(address, EXTERN_RECORD | GLOBAL_RECORD | IPS_EOF) {
        bail!("IPS cannot carry data at reserved address {address:#X}");
    }
    Ok(())
}

pub fn encode_ips(patch: &IpsPatch) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(IPS_MAGIC);
    for record in &patch.records {
        match record {
            IpsRecord::Data { address, bytes } => {
                check_data_address(*address)?;
                if bytes.is_empty() {
                    continue;
                }
                let len: u16 = bytes
                    .len()
                    .try_into()
                    .with_context(|| format!("IPS record at {address:#X} is too long"))?;
                write_u24_be(&mut out, *address);
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(bytes);
            }
            IpsRecord::Rle {
                address,
                count,
                value,
            } => {
                check_data_address(*address)?;
                write_u24_be(&mut out, *address);
                out.extend_from_slice(&0u16.to_be_bytes());
                out.extend_from_slice(&count.to_be_bytes());
                out.push(*value);
            }
            IpsRecord::Extern {
                name,
                address,
                size,
            } => {
                let mut payload = name.as_bytes().to_vec();
                payload.push(0);
                write_u24_le(&mut payload, *address);
                payload.push(*size);
                write_u24_be(&mut out, EXTERN_RECORD);
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.extend_from_slice(&payload);
            }
            IpsRecord::Global { name, address } => {
                let mut payload = name.as_bytes().to_vec();
                payload.push(0);
                write_u24_le(&mut payload, *address);
                write_u24_be(&mut out, GLOBAL_RECORD);
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.extend_from_slice(&payload);
            }
        }
    }
    write_u24_be(&mut out, IPS_EOF);
    Ok(out)
}

pub fn decode_ips(bytes: &[u8]) -> Result<IpsPatch> {
    let mut rd = Reader::new(bytes);
    if rd.read_exact(5)? != IPS_MAGIC {
        bail!("invalid IPS magic");
    }

    let mut patch = IpsPatch::default();
    loop {
        let address = rd.read_u24_be()?;
        if address == IPS_EOF {
            break;
        }
        let len = rd.read_u16_be()?;
        if len == 0 {
            let count = rd.read_u16_be()?;
            let value = rd.read_u8()?;
            patch.records.push(IpsRecord::Rle {
                address,
                count,
                value,
            });
            continue;
        }
        let payload = rd.read_exact(usize::from(len))?;
        let record = match address {
            EXTERN_RECORD | GLOBAL_RECORD => {
                let mut meta = Reader::new(payload);
                let name = meta.read_cstring()?;
                let target = meta.read_u24()?;
                if address == EXTERN_RECORD {
                    IpsRecord::Extern {
                        name,
                        address: target,
                        size: meta.read_u8()?,
                    }
                } else {
                    IpsRecord::Global {
                        name,
                        address: target,
                    }
                }
            }
            _ => IpsRecord::Data {
                address,
                bytes: payload.to_vec(),
            },
        };
        patch.records.push(record);
    }
    Ok(patch)
}
