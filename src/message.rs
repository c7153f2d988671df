//! DNS message encoding and decoding as used on the mDNS link.
//!
//! The class field of questions and records carries the mDNS top bit: in questions it
//! requests a unicast response, in records it is the cache-flush flag.

use std::fmt;
use std::io::{Cursor, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::name::{Name, MAX_NAME_LEN};

pub const CLASS_IN: u16 = 1;
const CLASS_TOP_BIT: u16 = 0x8000;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_AUTHORITATIVE: u16 = 0x0400;
const FLAG_TRUNCATED: u16 = 0x0200;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const FLAG_RECURSION_AVAILABLE: u16 = 0x0080;

const MAX_POINTER_JUMPS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Ptr,
    Txt,
    Aaaa,
    Srv,
    Any,
    Other(u16),
}

impl RecordType {
    pub fn code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ptr => 12,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
            RecordType::Srv => 33,
            RecordType::Any => 255,
            RecordType::Other(c) => c,
        }
    }
}

impl From<u16> for RecordType {
    fn from(code: u16) -> Self {
        match code {
            1 => RecordType::A,
            12 => RecordType::Ptr,
            16 => RecordType::Txt,
            28 => RecordType::Aaaa,
            33 => RecordType::Srv,
            255 => RecordType::Any,
            c => RecordType::Other(c),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::Ptr => write!(f, "PTR"),
            RecordType::Txt => write!(f, "TXT"),
            RecordType::Aaaa => write!(f, "AAAA"),
            RecordType::Srv => write!(f, "SRV"),
            RecordType::Any => write!(f, "ANY"),
            RecordType::Other(c) => write!(f, "TYPE{}", c),
        }
    }
}

/// Record data of the kinds the responder understands; anything else is kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(Name),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    Txt(Vec<String>),
    Other { rtype: u16, data: Vec<u8> },
}

impl RecordData {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordData::A(_) => RecordType::A,
            RecordData::Aaaa(_) => RecordType::Aaaa,
            RecordData::Ptr(_) => RecordType::Ptr,
            RecordData::Srv { .. } => RecordType::Srv,
            RecordData::Txt(_) => RecordType::Txt,
            RecordData::Other { rtype, .. } => RecordType::from(*rtype),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            RecordData::A(ip) => out.write_all(&ip.octets())?,
            RecordData::Aaaa(ip) => out.write_all(&ip.octets())?,
            RecordData::Ptr(name) => encode_name(name, out)?,
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                out.write_u16::<BigEndian>(*priority)?;
                out.write_u16::<BigEndian>(*weight)?;
                out.write_u16::<BigEndian>(*port)?;
                encode_name(target, out)?;
            }
            RecordData::Txt(strings) => {
                if strings.is_empty() {
                    // an empty TXT record still carries one zero-length string
                    out.write_u8(0)?;
                }
                for s in strings {
                    let bytes = s.as_bytes();
                    if bytes.len() > 255 {
                        anyhow::bail!("TXT string longer than 255 bytes");
                    }
                    out.write_u8(bytes.len() as u8)?;
                    out.write_all(bytes)?;
                }
            }
            RecordData::Other { data, .. } => out.write_all(data)?,
        }
        Ok(())
    }
}

impl fmt::Display for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordData::A(ip) => write!(f, "A {}", ip),
            RecordData::Aaaa(ip) => write!(f, "AAAA {}", ip),
            RecordData::Ptr(name) => write!(f, "PTR {}", name),
            RecordData::Srv { target, port, .. } => write!(f, "SRV {}:{}", target, port),
            RecordData::Txt(strings) => match strings.first() {
                Some(first) if strings.len() > 1 => write!(f, "TXT {:?}, ...", first),
                Some(first) => write!(f, "TXT {:?}", first),
                None => write!(f, "TXT"),
            },
            RecordData::Other { rtype, data } => write!(f, "TYPE{} {:?}", rtype, data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionEntry {
    pub name: Name,
    pub rtype: RecordType,
    /// The querier asked for a unicast reply.
    pub unicast: bool,
}

/// Resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RR {
    pub name: Name,
    pub ttl: u32,
    pub data: RecordData,
    pub cache_flush: bool,
}

impl RR {
    pub fn new(name: Name, ttl: u32, data: RecordData) -> Self {
        Self {
            name,
            ttl,
            data,
            cache_flush: false,
        }
    }

    pub fn rtype(&self) -> RecordType {
        self.data.record_type()
    }
}

impl fmt::Display for RR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.ttl)?;
        if self.cache_flush {
            write!(f, " !")?;
        }
        write!(f, " {}", self.data)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub id: u16,
    pub response: bool,
    pub opcode: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub rcode: u8,
    pub questions: Vec<QuestionEntry>,
    pub answers: Vec<RR>,
    pub authority: Vec<RR>,
    pub additional: Vec<RR>,
}

impl Message {
    /// An mDNS query: id 0, no recursion.
    pub fn query() -> Self {
        Self::default()
    }

    /// An authoritative mDNS response.
    pub fn response() -> Self {
        Self {
            response: true,
            authoritative: true,
            ..Self::default()
        }
    }

    pub fn is_query(&self) -> bool {
        !self.response
    }

    pub fn is_response(&self) -> bool {
        self.response
    }

    pub fn add_question(&mut self, name: Name, rtype: RecordType) {
        self.questions.push(QuestionEntry {
            name,
            rtype,
            unicast: false,
        });
    }

    pub fn add_answer(&mut self, rr: RR) {
        self.answers.push(rr);
    }

    pub fn add_additional(&mut self, rr: RR) {
        self.additional.push(rr);
    }

    pub fn has_question(&self, name: &Name, rtype: RecordType) -> bool {
        self.questions
            .iter()
            .any(|q| q.name == *name && q.rtype == rtype)
    }

    /// Remove repeated entries from every section, keeping first occurrences in order.
    pub fn dedup(&mut self) {
        dedup_in_order(&mut self.questions);
        dedup_in_order(&mut self.answers);
        dedup_in_order(&mut self.authority);
        dedup_in_order(&mut self.additional);
    }

    fn flags(&self) -> u16 {
        let mut flags = ((self.opcode as u16 & 0xf) << 11) | (self.rcode as u16 & 0xf);
        if self.response {
            flags |= FLAG_RESPONSE;
        }
        if self.authoritative {
            flags |= FLAG_AUTHORITATIVE;
        }
        if self.truncated {
            flags |= FLAG_TRUNCATED;
        }
        if self.recursion_desired {
            flags |= FLAG_RECURSION_DESIRED;
        }
        if self.recursion_available {
            flags |= FLAG_RECURSION_AVAILABLE;
        }
        flags
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(512);
        out.write_u16::<BigEndian>(self.id)?;
        out.write_u16::<BigEndian>(self.flags())?;
        out.write_u16::<BigEndian>(section_len(self.questions.len())?)?;
        out.write_u16::<BigEndian>(section_len(self.answers.len())?)?;
        out.write_u16::<BigEndian>(section_len(self.authority.len())?)?;
        out.write_u16::<BigEndian>(section_len(self.additional.len())?)?;

        for q in &self.questions {
            encode_name(&q.name, &mut out)?;
            out.write_u16::<BigEndian>(q.rtype.code())?;
            let class = if q.unicast {
                CLASS_IN | CLASS_TOP_BIT
            } else {
                CLASS_IN
            };
            out.write_u16::<BigEndian>(class)?;
        }
        for rr in self
            .answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additional)
        {
            encode_rr(rr, &mut out)?;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Message> {
        let mut cursor = Cursor::new(data);
        let id = cursor.read_u16::<BigEndian>().context("short header")?;
        let flags = cursor.read_u16::<BigEndian>().context("short header")?;
        let nquestions = cursor.read_u16::<BigEndian>().context("short header")?;
        let nanswers = cursor.read_u16::<BigEndian>().context("short header")?;
        let nauthority = cursor.read_u16::<BigEndian>().context("short header")?;
        let nadditional = cursor.read_u16::<BigEndian>().context("short header")?;

        let mut questions = Vec::with_capacity(nquestions.min(64) as usize);
        for _ in 0..nquestions {
            let name = read_name(data, &mut cursor)?;
            let rtype = RecordType::from(cursor.read_u16::<BigEndian>()?);
            let class = cursor.read_u16::<BigEndian>()?;
            questions.push(QuestionEntry {
                name,
                rtype,
                unicast: class & CLASS_TOP_BIT != 0,
            });
        }
        let mut read_section = |count: u16| -> Result<Vec<RR>> {
            let mut rrs = Vec::with_capacity(count.min(64) as usize);
            for _ in 0..count {
                rrs.push(parse_rr(data, &mut cursor)?);
            }
            Ok(rrs)
        };
        let answers = read_section(nanswers).context("answer section")?;
        let authority = read_section(nauthority).context("authority section")?;
        let additional = read_section(nadditional).context("additional section")?;

        Ok(Message {
            id,
            response: flags & FLAG_RESPONSE != 0,
            opcode: ((flags >> 11) & 0xf) as u8,
            authoritative: flags & FLAG_AUTHORITATIVE != 0,
            truncated: flags & FLAG_TRUNCATED != 0,
            recursion_desired: flags & FLAG_RECURSION_DESIRED != 0,
            recursion_available: flags & FLAG_RECURSION_AVAILABLE != 0,
            rcode: (flags & 0xf) as u8,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

fn dedup_in_order<T: PartialEq>(items: &mut Vec<T>) {
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        if !kept.contains(&item) {
            kept.push(item);
        }
    }
    *items = kept;
}

fn section_len(n: usize) -> Result<u16> {
    u16::try_from(n).context("too many entries in section")
}

pub(crate) fn encode_name(name: &Name, out: &mut Vec<u8>) -> Result<()> {
    for label in name.labels() {
        let bytes = label.as_bytes();
        out.write_u8(bytes.len() as u8)?;
        out.write_all(bytes)?;
    }
    out.write_u8(0)?;
    Ok(())
}

fn encode_rr(rr: &RR, out: &mut Vec<u8>) -> Result<()> {
    encode_name(&rr.name, out)?;
    out.write_u16::<BigEndian>(rr.rtype().code())?;
    let class = if rr.cache_flush {
        CLASS_IN | CLASS_TOP_BIT
    } else {
        CLASS_IN
    };
    out.write_u16::<BigEndian>(class)?;
    out.write_u32::<BigEndian>(rr.ttl)?;

    let mut rdata = Vec::new();
    rr.data.encode(&mut rdata)?;
    out.write_u16::<BigEndian>(u16::try_from(rdata.len()).context("rdata too long")?)?;
    out.write_all(&rdata)?;
    Ok(())
}

fn read_name(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<Name> {
    let mut labels = Vec::new();
    let mut total = 1;
    let mut jumps = 0;
    // after the first compression pointer the caller's cursor stays put
    let mut pos = cursor.position() as usize;
    let mut resume = None;
    loop {
        let n = *data.get(pos).context("name runs past end of message")?;
        pos += 1;
        if n == 0 {
            break;
        } else if n & 0xc0 == 0xc0 {
            let low = *data.get(pos).context("truncated compression pointer")?;
            pos += 1;
            if resume.is_none() {
                resume = Some(pos);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                anyhow::bail!("compression pointer loop");
            }
            pos = (((n & 0x3f) as usize) << 8) | low as usize;
        } else if n & 0xc0 != 0 {
            anyhow::bail!("unsupported label type {:#x}", n);
        } else {
            let end = pos + n as usize;
            let bytes = data.get(pos..end).context("label runs past end of message")?;
            labels.push(String::from_utf8_lossy(bytes).into_owned());
            total += n as usize + 1;
            if total > MAX_NAME_LEN {
                anyhow::bail!("name longer than {} bytes", MAX_NAME_LEN);
            }
            pos = end;
        }
    }
    cursor.set_position(resume.unwrap_or(pos) as u64);
    Name::new(labels, true)
}

fn parse_rr(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<RR> {
    let name = read_name(data, cursor)?;
    let rtype = RecordType::from(cursor.read_u16::<BigEndian>()?);
    let class = cursor.read_u16::<BigEndian>()?;
    let ttl = cursor.read_u32::<BigEndian>()?;
    let dlen = cursor.read_u16::<BigEndian>()? as usize;
    let start = cursor.position() as usize;
    let end = start + dlen;
    let rdata = data.get(start..end).context("rdata runs past end of message")?;

    let parsed = match rtype {
        RecordType::A => {
            let octets: [u8; 4] = rdata.try_into().context("A record is not 4 bytes")?;
            RecordData::A(Ipv4Addr::from(octets))
        }
        RecordType::Aaaa => {
            let octets: [u8; 16] = rdata.try_into().context("AAAA record is not 16 bytes")?;
            RecordData::Aaaa(Ipv6Addr::from(octets))
        }
        RecordType::Ptr => {
            let mut inner = Cursor::new(data);
            inner.set_position(start as u64);
            RecordData::Ptr(read_name(data, &mut inner)?)
        }
        RecordType::Srv => {
            let mut inner = Cursor::new(data);
            inner.set_position(start as u64);
            let priority = inner.read_u16::<BigEndian>()?;
            let weight = inner.read_u16::<BigEndian>()?;
            let port = inner.read_u16::<BigEndian>()?;
            let target = read_name(data, &mut inner)?;
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            }
        }
        RecordType::Txt => RecordData::Txt(parse_txt(rdata)?),
        other => RecordData::Other {
            rtype: other.code(),
            data: rdata.to_vec(),
        },
    };
    cursor.set_position(end as u64);

    Ok(RR {
        name,
        ttl,
        data: parsed,
        cache_flush: class & CLASS_TOP_BIT != 0,
    })
}

fn parse_txt(rdata: &[u8]) -> Result<Vec<String>> {
    let mut cursor = Cursor::new(rdata);
    let mut out = Vec::new();
    while (cursor.position() as usize) < rdata.len() {
        let len = cursor.read_u8()?;
        let mut buf = vec![0; len as usize];
        cursor.read_exact(&mut buf)?;
        out.push(String::from_utf8_lossy(&buf).into_owned());
    }
    if out.len() == 1 && out[0].is_empty() {
        out.clear();
    }
    Ok(out)
}
