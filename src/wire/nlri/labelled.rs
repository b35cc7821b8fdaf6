use std::convert::TryFrom;
use std::io::{Error, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use super::Nlri;
use crate::wire::error::NotificationError;
use crate::wire::primitives::{LabelStack, Prefix, RouteDistinguisher};
use crate::wire::AFI;

/// Labelled unicast prefix (RFC 8277)
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct LabelledNlri {
    pub labels: LabelStack,
    pub prefix: Prefix,
    pub path_id: Option<u32>,
}

/// VPN unicast prefix: label stack plus route distinguisher (RFC 4364)
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct VpnNlri {
    pub rd: RouteDistinguisher,
    pub labels: LabelStack,
    pub prefix: Prefix,
    pub path_id: Option<u32>,
}

pub(super) fn unpack_labelled(
    stream: &mut impl Read,
    afi: AFI,
    path_id: Option<u32>,
) -> Result<Nlri, Error> {
    let bits = stream.read_u8()?;
    let (labels, label_bytes) = LabelStack::unpack_labels(stream, usize::from(bits / 24).max(1))?;
    let mask = mask_after(bits, label_bytes, 0)?;
    let prefix = Prefix::unpack_masked(stream, afi, mask)?;
    Ok(Nlri::Labelled(LabelledNlri {
        labels,
        prefix,
        path_id,
    }))
}

pub(super) fn pack_labelled(nlri: &LabelledNlri, write: &mut impl Write) -> Result<(), Error> {
    write.write_u8(nlri.labels.bit_len() + nlri.prefix.length)?;
    nlri.labels.pack(write)?;
    nlri.prefix.pack_masked(write)
}

pub(super) fn unpack_vpn(
    stream: &mut impl Read,
    afi: AFI,
    path_id: Option<u32>,
) -> Result<Nlri, Error> {
    let bits = stream.read_u8()?;
    let (labels, label_bytes) = LabelStack::unpack_labels(stream, usize::from(bits / 24).max(1))?;
    let rd = RouteDistinguisher::unpack_rd(stream)?;
    let mask = mask_after(bits, label_bytes, 64)?;
    let prefix = Prefix::unpack_masked(stream, afi, mask)?;
    Ok(Nlri::Vpn(VpnNlri {
        rd,
        labels,
        prefix,
        path_id,
    }))
}

pub(super) fn pack_vpn(nlri: &VpnNlri, write: &mut impl Write) -> Result<(), Error> {
    write.write_u8(nlri.labels.bit_len() + 64 + nlri.prefix.length)?;
    nlri.labels.pack(write)?;
    nlri.rd.pack(write)?;
    nlri.prefix.pack_masked(write)
}

/// Remaining prefix bits once labels (and the RD, for VPN) are consumed
fn mask_after(bits: u8, label_bytes: usize, rd_bits: u16) -> Result<u8, Error> {
    let consumed = (label_bytes * 8) as u16 + rd_bits;
    u16::from(bits)
        .checked_sub(consumed)
        .and_then(|mask| u8::try_from(mask).ok())
        .ok_or_else(|| {
            NotificationError::update(
                10,
                format!("Labelled NLRI length {} shorter than its label stack", bits),
            )
            .into()
        })
}
