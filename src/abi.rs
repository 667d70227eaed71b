//! Event ABI parsing and log decoding
//!
//! Contract events are configured as human-readable signatures, e.g.
//! `event Transfer(address indexed from, address indexed to, uint256 value)`.
//! Each signature is hashed into its topic0 so that raw logs returned by
//! `eth_getLogs` can be matched to an event and decoded into named, typed
//! arguments. Indexed dynamic values (string, bytes, arrays) are only
//! available as their keccak hash and are kept as such.

use crate::records::{ArgValue, EventArgs};
use crate::types::Log;
use alloy_primitives::{keccak256, Address, B256, I256, U256};
use anyhow::{Context, Result};
use std::collections::HashMap;

/// Most values (array elements included) decoded from the data of one log.
///
/// Nested dynamic arrays may share their encoded region, so the data length
/// alone does not bound the decoded size.
pub const MAX_DECODED_VALUES: usize = 65_536;

/// Solidity parameter type supported by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint(usize),
    Int(usize),
    Bool,
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<ParamType>),
    FixedArray(Box<ParamType>, usize),
}

impl ParamType {
    /// Parse a Solidity type name such as `uint256`, `bytes32` or `address[]`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with('(') || s.starts_with("tuple") {
            anyhow::bail!("Tuple parameters are not supported: {}", s);
        }

        // Array suffixes bind right-to-left: `uint8[2][]` is a dynamic array of `uint8[2]`.
        if let Some(stripped) = s.strip_suffix(']') {
            let open = stripped
                .rfind('[')
                .with_context(|| format!("Unbalanced array brackets in type: {}", s))?;
            let inner = ParamType::parse(&stripped[..open])?;
            let dim = &stripped[open + 1..];
            return if dim.is_empty() {
                Ok(ParamType::Array(Box::new(inner)))
            } else {
                let len: usize = dim
                    .parse()
                    .with_context(|| format!("Invalid array length in type: {}", s))?;
                Ok(ParamType::FixedArray(Box::new(inner), len))
            };
        }

        match s {
            "address" => Ok(ParamType::Address),
            "bool" => Ok(ParamType::Bool),
            "string" => Ok(ParamType::String),
            "bytes" => Ok(ParamType::Bytes),
            "uint" => Ok(ParamType::Uint(256)),
            "int" => Ok(ParamType::Int(256)),
            _ => {
                if let Some(bits) = s.strip_prefix("uint") {
                    Ok(ParamType::Uint(parse_int_bits(bits, s)?))
                } else if let Some(bits) = s.strip_prefix("int") {
                    Ok(ParamType::Int(parse_int_bits(bits, s)?))
                } else if let Some(len) = s.strip_prefix("bytes") {
                    let len: usize = len
                        .parse()
                        .with_context(|| format!("Invalid fixed bytes type: {}", s))?;
                    if !(1..=32).contains(&len) {
                        anyhow::bail!("Fixed bytes width must be 1..=32: {}", s);
                    }
                    Ok(ParamType::FixedBytes(len))
                } else {
                    anyhow::bail!("Unsupported parameter type: {}", s)
                }
            }
        }
    }

    /// Canonical type name used in the event signature hash.
    pub fn canonical(&self) -> String {
        match self {
            ParamType::Address => "address".to_string(),
            ParamType::Uint(bits) => format!("uint{}", bits),
            ParamType::Int(bits) => format!("int{}", bits),
            ParamType::Bool => "bool".to_string(),
            ParamType::FixedBytes(len) => format!("bytes{}", len),
            ParamType::Bytes => "bytes".to_string(),
            ParamType::String => "string".to_string(),
            ParamType::Array(inner) => format!("{}[]", inner.canonical()),
            ParamType::FixedArray(inner, len) => format!("{}[{}]", inner.canonical(), len),
        }
    }

    /// Whether the value is encoded out-of-line (behind an offset).
    pub fn is_dynamic(&self) -> bool {
        match self {
            ParamType::Bytes | ParamType::String | ParamType::Array(_) => true,
            ParamType::FixedArray(inner, _) => inner.is_dynamic(),
            _ => false,
        }
    }

    /// Whether the value fits in a single 32-byte word.
    fn is_value_type(&self) -> bool {
        !matches!(
            self,
            ParamType::Bytes | ParamType::String | ParamType::Array(_) | ParamType::FixedArray(..)
        )
    }

    /// Size in bytes of the inline (head) encoding.
    fn head_size(&self) -> usize {
        match self {
            ParamType::FixedArray(inner, len) if !inner.is_dynamic() => inner.head_size() * len,
            _ => 32,
        }
    }
}

fn parse_int_bits(bits: &str, ty: &str) -> Result<usize> {
    let bits: usize = bits
        .parse()
        .with_context(|| format!("Invalid integer type: {}", ty))?;
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        anyhow::bail!("Integer width must be a multiple of 8 in 8..=256: {}", ty);
    }
    Ok(bits)
}

/// One declared event parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParam {
    pub name: String,
    pub ty: ParamType,
    pub indexed: bool,
}

/// A parsed event declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAbi {
    pub name: String,
    pub inputs: Vec<EventParam>,
}

impl EventAbi {
    /// Parse a human-readable event declaration.
    ///
    /// The leading `event` keyword is optional; unnamed parameters are
    /// named `arg0`, `arg1`, ... by position.
    pub fn parse(declaration: &str) -> Result<Self> {
        let decl = declaration.trim().trim_end_matches(';').trim();
        let decl = decl.strip_prefix("event ").unwrap_or(decl).trim();

        let open = decl
            .find('(')
            .with_context(|| format!("Missing '(' in event declaration: {}", declaration))?;
        let close = decl
            .rfind(')')
            .with_context(|| format!("Missing ')' in event declaration: {}", declaration))?;
        if close < open {
            anyhow::bail!("Malformed event declaration: {}", declaration);
        }
        let trailer = decl[close + 1..].trim();
        if trailer == "anonymous" {
            anyhow::bail!("Anonymous events have no topic0 and cannot be matched: {}", declaration);
        } else if !trailer.is_empty() {
            anyhow::bail!("Unexpected text after event parameters: {}", declaration);
        }

        let name = decl[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            anyhow::bail!("Invalid event name in declaration: {}", declaration);
        }

        let params = decl[open + 1..close].trim();
        let mut inputs = Vec::new();
        if !params.is_empty() {
            for (position, param) in params.split(',').enumerate() {
                let mut tokens = param.split_whitespace();
                let ty = tokens
                    .next()
                    .with_context(|| format!("Empty parameter in event {}", name))?;
                let ty = ParamType::parse(ty)
                    .with_context(|| format!("Invalid parameter {} of event {}", position, name))?;
                let mut indexed = false;
                let mut param_name = None;
                for token in tokens {
                    if token == "indexed" && !indexed && param_name.is_none() {
                        indexed = true;
                    } else if param_name.is_none() {
                        param_name = Some(token.to_string());
                    } else {
                        anyhow::bail!("Unexpected token '{}' in event {}", token, name);
                    }
                }
                inputs.push(EventParam {
                    name: param_name.unwrap_or_else(|| format!("arg{}", position)),
                    ty,
                    indexed,
                });
            }
        }

        if inputs.iter().filter(|p| p.indexed).count() > 3 {
            anyhow::bail!("Event {} declares more than 3 indexed parameters", name);
        }

        Ok(Self {
            name: name.to_string(),
            inputs,
        })
    }

    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub fn signature(&self) -> String {
        let types: Vec<String> = self.inputs.iter().map(|p| p.ty.canonical()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// keccak256 of the canonical signature.
    pub fn topic0(&self) -> B256 {
        keccak256(self.signature().as_bytes())
    }

    /// Decode a log of this event into its argument mapping.
    pub fn decode(&self, topics: &[B256], data: &[u8]) -> Result<EventArgs> {
        let indexed_count = self.inputs.iter().filter(|p| p.indexed).count();
        if topics.len() != indexed_count + 1 {
            anyhow::bail!(
                "Event {} expects {} topics, log has {}",
                self.name,
                indexed_count + 1,
                topics.len()
            );
        }

        let body_types: Vec<ParamType> = self
            .inputs
            .iter()
            .filter(|p| !p.indexed)
            .map(|p| p.ty.clone())
            .collect();
        let mut budget = MAX_DECODED_VALUES;
        let mut body = decode_tuple(&body_types, data, 0, &mut budget)
            .with_context(|| format!("Failed to decode data of event {}", self.name))?
            .into_iter();
        let mut indexed_topics = topics[1..].iter();

        let mut args = EventArgs::new();
        for param in &self.inputs {
            let value = if param.indexed {
                let topic = indexed_topics
                    .next()
                    .context("Ran out of topics while decoding")?;
                if param.ty.is_value_type() {
                    decode_word(&param.ty, topic.as_slice())?
                } else {
                    ArgValue::Hash(*topic)
                }
            } else {
                body.next().context("Ran out of data values while decoding")?
            };
            args.push(param.name.clone(), value);
        }
        Ok(args)
    }
}

/// Events of one contract, indexed by topic0.
#[derive(Debug, Clone, Default)]
pub struct ContractAbi {
    events: HashMap<B256, EventAbi>,
}

impl ContractAbi {
    /// Parse a list of event declarations.
    pub fn parse(declarations: &[String]) -> Result<Self> {
        let mut events = HashMap::new();
        for decl in declarations {
            let event = EventAbi::parse(decl)?;
            if events.insert(event.topic0(), event.clone()).is_some() {
                anyhow::bail!("Duplicate event declaration: {}", event.signature());
            }
        }
        Ok(Self { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Match a log to a declared event and decode it.
    ///
    /// Returns the event name and arguments.
    pub fn decode_log(&self, log: &Log) -> Result<(String, EventArgs)> {
        let topic0 = log.topics.first().context("Log has no topics")?;
        let event = self
            .events
            .get(topic0)
            .with_context(|| format!("No declared event matches topic0 0x{:x}", topic0))?;
        let args = event.decode(&log.topics, &log.data)?;
        Ok((event.name.clone(), args))
    }
}

fn read_word(data: &[u8], pos: usize) -> Result<&[u8]> {
    data.get(pos..pos.saturating_add(32))
        .filter(|w| w.len() == 32)
        .with_context(|| format!("Data too short: need word at {}, have {} bytes", pos, data.len()))
}

/// Read a word that holds an offset or a length.
fn read_usize(data: &[u8], pos: usize) -> Result<usize> {
    let word = read_word(data, pos)?;
    if word[..24].iter().any(|b| *b != 0) {
        anyhow::bail!("Offset or length at {} does not fit in 64 bits", pos);
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(buf)).context("Offset or length overflows usize")
}

/// Decode a single-word value type.
fn decode_word(ty: &ParamType, word: &[u8]) -> Result<ArgValue> {
    match ty {
        ParamType::Address => Ok(ArgValue::Address(Address::from_slice(&word[12..32]))),
        ParamType::Uint(_) => Ok(ArgValue::Uint(U256::from_be_slice(word))),
        ParamType::Int(_) => Ok(ArgValue::Int(I256::from_raw(U256::from_be_slice(word)))),
        ParamType::Bool => Ok(ArgValue::Bool(word.iter().any(|b| *b != 0))),
        ParamType::FixedBytes(len) => Ok(ArgValue::FixedBytes(word[..*len].to_vec())),
        other => anyhow::bail!("{} is not a single-word type", other.canonical()),
    }
}

/// Decode a sequence of values laid out as an ABI tuple starting at `base`.
fn decode_tuple(
    types: &[ParamType],
    data: &[u8],
    base: usize,
    budget: &mut usize,
) -> Result<Vec<ArgValue>> {
    let mut values = Vec::with_capacity(types.len());
    let mut head = base;
    for ty in types {
        let value = if ty.is_dynamic() {
            let offset = read_usize(data, head)?;
            let pos = base
                .checked_add(offset)
                .context("Offset overflows data position")?;
            decode_in_place(ty, data, pos, budget)?
        } else {
            decode_in_place(ty, data, head, budget)?
        };
        head = head
            .checked_add(ty.head_size())
            .context("Head position overflows")?;
        values.push(value);
    }
    Ok(values)
}

/// Decode one value whose encoding starts at `pos`.
fn decode_in_place(
    ty: &ParamType,
    data: &[u8],
    pos: usize,
    budget: &mut usize,
) -> Result<ArgValue> {
    *budget = budget
        .checked_sub(1)
        .with_context(|| format!("Log decodes to more than {} values", MAX_DECODED_VALUES))?;
    match ty {
        ParamType::Bytes | ParamType::String => {
            let len = read_usize(data, pos)?;
            let start = pos + 32;
            let bytes = data
                .get(start..start.saturating_add(len))
                .filter(|b| b.len() == len)
                .with_context(|| format!("Data too short for {} bytes at {}", len, start))?;
            if *ty == ParamType::String {
                let s = String::from_utf8(bytes.to_vec()).context("String value is not UTF-8")?;
                Ok(ArgValue::String(s))
            } else {
                Ok(ArgValue::Bytes(bytes.to_vec()))
            }
        }
        ParamType::Array(inner) => {
            let len = read_usize(data, pos)?;
            // Every element needs at least one word; refuse lengths the data cannot hold
            if len > data.len() / 32 {
                anyhow::bail!("Array length {} exceeds available data", len);
            }
            if len > *budget {
                anyhow::bail!("Log decodes to more than {} values", MAX_DECODED_VALUES);
            }
            let types = vec![(**inner).clone(); len];
            Ok(ArgValue::Array(decode_tuple(&types, data, pos + 32, budget)?))
        }
        ParamType::FixedArray(inner, len) => {
            if *len > data.len() / 32 + 1 {
                anyhow::bail!("Array length {} exceeds available data", len);
            }
            if *len > *budget {
                anyhow::bail!("Log decodes to more than {} values", MAX_DECODED_VALUES);
            }
            let types = vec![(**inner).clone(); *len];
            Ok(ArgValue::Array(decode_tuple(&types, data, pos, budget)?))
        }
        _ => decode_word(ty, read_word(data, pos)?),
    }
}
