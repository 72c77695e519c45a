/*
    MediaBay
    https://github.com/dbalsom/mediabay

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/file_parsers/compression/lzhuf.rs

    LZSS with adaptive Huffman coding, as produced by the LZHUF.C program of
    Yoshizaki, Okumura and Rikitake. Teledisk's "advanced compression" is this
    coding with no length header.
*/

//! LZHUF decompression.
//!
//! The dictionary is a 4096 byte ring initialised with spaces. Literals and match lengths share
//! one adaptive Huffman tree of 314 symbols; match positions use a static code for their upper 6
//! bits followed by 6 raw bits.

use crate::MediaError;

const N: usize = 4096;
const F: usize = 60;
const THRESHOLD: usize = 2;
const N_CHAR: usize = 256 - THRESHOLD + F;
const T: usize = N_CHAR * 2 - 1;
const R: usize = T - 1;
const MAX_FREQ: u32 = 0x8000;

/// Reads single bits, most significant first, and reports the end of input exactly.
struct BitReader<'a> {
    data: &'a [u8],
    pos:  usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader { data, pos: 0 }
    }

    fn bit(&mut self) -> Option<usize> {
        let byte = *self.data.get(self.pos / 8)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Some(bit as usize)
    }

    fn byte(&mut self) -> Option<usize> {
        let mut value = 0;
        for _ in 0..8 {
            value = (value << 1) | self.bit()?;
        }
        Some(value)
    }
}

/// Upper 6 bits of a match position, indexed by the first byte of its code.
fn position_code(byte: usize) -> usize {
    match byte {
        0..=31 => 0,
        32..=79 => 1 + (byte - 32) / 16,
        80..=143 => 4 + (byte - 80) / 8,
        144..=191 => 12 + (byte - 144) / 4,
        192..=239 => 24 + (byte - 192) / 2,
        _ => 48 + (byte - 240),
    }
}

/// Total bit length of a position code, indexed by its first byte.
fn position_len(byte: usize) -> usize {
    match byte {
        0..=31 => 3,
        32..=79 => 4,
        80..=143 => 5,
        144..=191 => 6,
        192..=239 => 7,
        _ => 8,
    }
}

/// The adaptive Huffman tree. Leaves are stored as `son` values of `T + symbol`.
struct HuffTree {
    freq: [u32; T + 1],
    parent: [usize; T + N_CHAR],
    son: [usize; T],
}

impl HuffTree {
    fn new() -> Box<Self> {
        let mut tree = Box::new(HuffTree {
            freq: [0; T + 1],
            parent: [0; T + N_CHAR],
            son: [0; T],
        });

        for i in 0..N_CHAR {
            tree.freq[i] = 1;
            tree.son[i] = i + T;
            tree.parent[i + T] = i;
        }
        let mut i = 0;
        for j in N_CHAR..=R {
            tree.freq[j] = tree.freq[i] + tree.freq[i + 1];
            tree.son[j] = i;
            tree.parent[i] = j;
            tree.parent[i + 1] = j;
            i += 2;
        }
        tree.freq[T] = 0xFFFF;
        tree.parent[R] = 0;
        tree
    }

    /// Halve all frequencies and rebuild the tree once the root reaches [`MAX_FREQ`].
    fn rebuild(&mut self) {
        let mut j = 0;
        for i in 0..T {
            if self.son[i] >= T {
                self.freq[j] = (self.freq[i] + 1) / 2;
                self.son[j] = self.son[i];
                j += 1;
            }
        }

        let mut i = 0;
        for j in N_CHAR..T {
            let f = self.freq[i] + self.freq[i + 1];
            let mut k = j;
            while k > 0 && f < self.freq[k - 1] {
                k -= 1;
            }
            self.freq.copy_within(k..j, k + 1);
            self.freq[k] = f;
            self.son.copy_within(k..j, k + 1);
            self.son[k] = i;
            i += 2;
        }

        for i in 0..T {
            let k = self.son[i];
            self.parent[k] = i;
            if k < T {
                self.parent[k + 1] = i;
            }
        }
    }

    fn update(&mut self, symbol: usize) {
        if self.freq[R] == MAX_FREQ {
            self.rebuild();
        }

        let mut c = self.parent[symbol + T];
        loop {
            self.freq[c] += 1;
            let k = self.freq[c];

            if k > self.freq[c + 1] {
                let mut l = c + 1;
                while k > self.freq[l + 1] {
                    l += 1;
                }
                self.freq[c] = self.freq[l];
                self.freq[l] = k;

                let i = self.son[c];
                self.parent[i] = l;
                if i < T {
                    self.parent[i + 1] = l;
                }
                let j = self.son[l];
                self.son[l] = i;
                self.parent[j] = c;
                if j < T {
                    self.parent[j + 1] = c;
                }
                self.son[c] = j;
                c = l;
            }

            c = self.parent[c];
            if c == 0 {
                break;
            }
        }
    }

    fn decode_symbol(&mut self, bits: &mut BitReader) -> Option<usize> {
        let mut c = self.son[R];
        while c < T {
            c = self.son[c + bits.bit()?];
        }
        let symbol = c - T;
        self.update(symbol);
        Some(symbol)
    }
}

fn decode_position(bits: &mut BitReader) -> Option<usize> {
    let mut i = bits.byte()?;
    let code = position_code(i) << 6;
    for _ in 0..position_len(i) - 2 {
        i = (i << 1) | bits.bit()?;
    }
    Some(code | (i & 0x3F))
}

/// Decompress `data`. With `header` set the stream starts with the little-endian u32 length of
/// the expanded data, as written by LZHUF.C; otherwise decoding runs until the input is
/// exhausted.
pub fn expand(data: &[u8], header: bool) -> Result<Vec<u8>, MediaError> {
    let (limit, body) = if header {
        if data.len() < 4 {
            return Err(MediaError::malformed("LZHUF stream is missing its length header"));
        }
        let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        (len, &data[4..])
    }
    else {
        (usize::MAX, data)
    };

    let mut bits = BitReader::new(body);
    let mut tree = HuffTree::new();
    let mut ring = [b' '; N];
    let mut r = N - F;
    let mut out = Vec::with_capacity(body.len().saturating_mul(2));

    while out.len() < limit {
        let Some(symbol) = tree.decode_symbol(&mut bits)
        else {
            break;
        };

        if symbol < 256 {
            out.push(symbol as u8);
            ring[r] = symbol as u8;
            r = (r + 1) & (N - 1);
        }
        else {
            let Some(position) = decode_position(&mut bits)
            else {
                break;
            };
            let start = r.wrapping_sub(position + 1) & (N - 1);
            let len = symbol - 255 + THRESHOLD;
            for k in 0..len {
                let byte = ring[(start + k) & (N - 1)];
                out.push(byte);
                ring[r] = byte;
                r = (r + 1) & (N - 1);
            }
        }
    }

    if header {
        if out.len() < limit {
            log::error!("expand(): Stream ended after {} of {} bytes", out.len(), limit);
            return Err(MediaError::malformed("LZHUF stream ended early"));
        }
        out.truncate(limit);
    }
    log::trace!("expand(): {} bytes expanded to {}", data.len(), out.len());
    Ok(out)
}
