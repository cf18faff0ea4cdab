//! Reader for Galactic / Thermo `.spc` files (new little-endian layout).
//!
//! ```text
//!  0      512-byte main header (flags, version, point count, first/last x)
//!  512    optional x array (fnpts × f32) when TXVALS is set
//!  …      per subfile: 32-byte subheader, then fnpts y values
//! ```
//!
//! Y values are IEEE floats when the exponent byte is `0x80`, otherwise
//! scaled integers: `y = raw · 2^(exp − 32)` (32-bit) or
//! `y = raw · 2^(exp − 16)` (16-bit, TSPREC).

use anyhow::{Context, Result, bail, ensure};

use super::model::Spectrum;

const HEADER_LEN: usize = 512;
const SUBHEADER_LEN: usize = 32;
const VERSION_NEW_LSB: u8 = 0x4B;
const FLOAT_EXPONENT: i8 = -128;

// ftflgs bits
const TSPREC: u8 = 0x01;
const TMULTI: u8 = 0x04;
const TXYXYS: u8 = 0x40;
const TXVALS: u8 = 0x80;

/// Fields of the main header the reader needs.
#[derive(Debug, Clone, Copy)]
struct Header {
    flags: u8,
    exponent: i8,
    npts: usize,
    first: f64,
    last: f64,
    nsub: usize,
}

/// Little-endian cursor over the file bytes.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .with_context(|| format!("SPC file truncated at byte {}", self.pos))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        ensure!(self.pos + n <= self.bytes.len(), "SPC file truncated at byte {}", self.pos);
        self.pos += n;
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.take::<1>()?[0] as i8)
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take()?))
    }
}

/// Parse all subfiles of an SPC file into spectra.
pub fn parse(bytes: &[u8]) -> Result<Vec<Spectrum>> {
    ensure!(bytes.len() >= HEADER_LEN, "SPC file shorter than its {HEADER_LEN}-byte header");
    let mut cur = Cursor::new(bytes);
    let header = read_header(&mut cur)?;

    if header.flags & TXYXYS != 0 {
        bail!("SPC XYXY (per-subfile x axis) files are not supported");
    }
    ensure!(header.npts >= 2, "SPC file declares {} points", header.npts);

    let multi = header.flags & TMULTI != 0;
    let nsub = if multi { header.nsub.max(1) } else { 1 };
    ensure_payload_fits(&header, nsub, bytes.len() - cur.pos)?;

    let x: Vec<f64> = if header.flags & TXVALS != 0 {
        (0..header.npts)
            .map(|_| cur.f32().map(f64::from))
            .collect::<Result<_>>()
            .context("reading SPC x values")?
    } else {
        let step = (header.last - header.first) / (header.npts - 1) as f64;
        (0..header.npts)
            .map(|i| header.first + step * i as f64)
            .collect()
    };

    let mut spectra = Vec::with_capacity(nsub);
    for sub in 0..nsub {
        let y = read_subfile(&mut cur, &header, multi)
            .with_context(|| format!("reading SPC subfile {sub}"))?;
        spectra.push(Spectrum::new(x.clone(), y));
    }
    log::debug!(
        "SPC: {} subfile(s) of {} points, x {}..{}",
        spectra.len(),
        header.npts,
        x[0],
        x[x.len() - 1]
    );
    Ok(spectra)
}

fn read_header(cur: &mut Cursor<'_>) -> Result<Header> {
    let flags = cur.u8()?;
    let version = cur.u8()?;
    if version != VERSION_NEW_LSB {
        bail!("unsupported SPC version byte 0x{version:02X} (only 0x4B is read)");
    }
    let _experiment = cur.u8()?;
    let exponent = cur.i8()?;
    let npts = cur.u32()? as usize;
    let first = cur.f64()?;
    let last = cur.f64()?;
    let nsub = cur.u32()? as usize;
    cur.skip(HEADER_LEN - cur.pos)?;
    Ok(Header {
        flags,
        exponent,
        npts,
        first,
        last,
        nsub,
    })
}

/// Reject headers whose point or subfile counts need more bytes than the
/// file holds, before anything is allocated from them.
fn ensure_payload_fits(header: &Header, nsub: usize, remaining: usize) -> Result<()> {
    // Narrowest y encoding; a float subfile in a TSPREC file only needs more.
    let width = if header.flags & TSPREC != 0 { 2 } else { 4 };
    let x_bytes = if header.flags & TXVALS != 0 { header.npts.checked_mul(4) } else { Some(0) };
    let needed = header
        .npts
        .checked_mul(width)
        .and_then(|y| y.checked_add(SUBHEADER_LEN))
        .and_then(|sub| sub.checked_mul(nsub))
        .zip(x_bytes)
        .and_then(|(subs, x)| subs.checked_add(x));
    match needed {
        Some(n) if n <= remaining => Ok(()),
        _ => bail!(
            "SPC header declares {nsub} subfile(s) of {} points but only {remaining} bytes follow",
            header.npts
        ),
    }
}

fn read_subfile(cur: &mut Cursor<'_>, header: &Header, multi: bool) -> Result<Vec<f64>> {
    let start = cur.pos;
    let _sub_flags = cur.u8()?;
    let sub_exponent = cur.i8()?;
    cur.skip(SUBHEADER_LEN - (cur.pos - start))?;

    let exponent = if multi { sub_exponent } else { header.exponent };
    if exponent == FLOAT_EXPONENT {
        return (0..header.npts).map(|_| cur.f32().map(f64::from)).collect();
    }
    if header.flags & TSPREC != 0 {
        let scale = 2f64.powi(exponent as i32 - 16);
        (0..header.npts)
            .map(|_| cur.i16().map(|v| v as f64 * scale))
            .collect()
    } else {
        let scale = 2f64.powi(exponent as i32 - 32);
        (0..header.npts)
            .map(|_| cur.i32().map(|v| v as f64 * scale))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(flags: u8, exponent: i8, npts: u32, first: f64, last: f64, nsub: u32) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = flags;
        buf[1] = VERSION_NEW_LSB;
        buf[3] = exponent as u8;
        buf[4..8].copy_from_slice(&npts.to_le_bytes());
        buf[8..16].copy_from_slice(&first.to_le_bytes());
        buf[16..24].copy_from_slice(&last.to_le_bytes());
        buf[24..28].copy_from_slice(&nsub.to_le_bytes());
        buf
    }

    fn subheader(exponent: i8) -> Vec<u8> {
        let mut buf = vec![0u8; SUBHEADER_LEN];
        buf[1] = exponent as u8;
        buf
    }

    #[test]
    fn test_float_single_subfile() {
        let mut bytes = header(0, FLOAT_EXPONENT, 3, 100.0, 300.0, 1);
        bytes.extend(subheader(FLOAT_EXPONENT));
        for v in [1.5f32, 2.5, 3.5] {
            bytes.extend(v.to_le_bytes());
        }
        let spectra = parse(&bytes).unwrap();
        assert_eq!(spectra.len(), 1);
        assert_eq!(spectra[0].x, vec![100.0, 200.0, 300.0]);
        assert_eq!(spectra[0].y, vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_scaled_integers_multi_subfile() {
        // exponent 32 → scale 1.0 for 32-bit integers
        let mut bytes = header(TMULTI, 0, 2, 10.0, 20.0, 2);
        for sub in 0..2i32 {
            bytes.extend(subheader(32));
            for v in [sub * 10 + 1, sub * 10 + 2] {
                bytes.extend(v.to_le_bytes());
            }
        }
        let spectra = parse(&bytes).unwrap();
        assert_eq!(spectra.len(), 2);
        assert_eq!(spectra[1].y, vec![11.0, 12.0]);
    }

    #[test]
    fn test_explicit_x_values() {
        let mut bytes = header(TXVALS, FLOAT_EXPONENT, 2, 0.0, 0.0, 1);
        for v in [5.0f32, 7.0] {
            bytes.extend(v.to_le_bytes());
        }
        bytes.extend(subheader(FLOAT_EXPONENT));
        for v in [1.0f32, 2.0] {
            bytes.extend(v.to_le_bytes());
        }
        let spectra = parse(&bytes).unwrap();
        assert_eq!(spectra[0].x, vec![5.0, 7.0]);
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let mut bytes = header(0, FLOAT_EXPONENT, 4, 0.0, 3.0, 1);
        bytes.extend(subheader(FLOAT_EXPONENT));
        bytes.extend(1.0f32.to_le_bytes());
        assert!(parse(&bytes).is_err());

        let mut old = header(0, 0, 2, 0.0, 1.0, 1);
        old[1] = 0x4D;
        assert!(parse(&old).is_err());
    }

    #[test]
    fn test_oversized_counts_are_errors() {
        let mut bytes = header(TMULTI, 0, 2, 10.0, 20.0, u32::MAX);
        bytes.extend(subheader(32));
        bytes.extend([0u8; 8]);
        let err = parse(&bytes).unwrap_err();
        assert!(err.to_string().contains("subfile"), "{err}");

        let mut bytes = header(0, FLOAT_EXPONENT, u32::MAX, 0.0, 1.0, 1);
        bytes.extend(subheader(FLOAT_EXPONENT));
        assert!(parse(&bytes).is_err());

        let mut bytes = header(TXVALS, FLOAT_EXPONENT, 1 << 30, 0.0, 0.0, 1);
        bytes.extend([0u8; 64]);
        assert!(parse(&bytes).is_err());
    }
}
