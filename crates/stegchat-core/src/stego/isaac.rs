//! ISAAC, Bob Jenkins' 32-bit cryptographic pseudorandom number generator.
//!
//! Unlike `rand_isaac`, which expands a 32 byte seed, this generator is initialized
//! from a full 256 word seed vector (`randinit` with `flag = TRUE` in the reference
//! implementation). Results are handed out in the reference order, i.e. from the end
//! of each freshly generated block to its start.

use rand_core::{impls, Error, RngCore};

const RAND_SIZE: usize = 256;
const GOLDEN_RATIO: u32 = 0x9e37_79b9;

#[derive(Clone)]
pub struct Isaac {
    rsl: [u32; RAND_SIZE],
    mem: [u32; RAND_SIZE],
    a: u32,
    b: u32,
    c: u32,
    cnt: usize,
}

impl Isaac {
    pub fn from_seed_words(seed: [u32; RAND_SIZE]) -> Self {
        let mut rng = Self {
            rsl: seed,
            mem: [0; RAND_SIZE],
            a: 0,
            b: 0,
            c: 0,
            cnt: 0,
        };
        rng.init();
        rng
    }

    fn init(&mut self) {
        let mut v = [GOLDEN_RATIO; 8];
        for _ in 0..4 {
            mix(&mut v);
        }

        // first pass folds in the seed, second pass the state of the first
        for i in (0..RAND_SIZE).step_by(8) {
            for (j, x) in v.iter_mut().enumerate() {
                *x = x.wrapping_add(self.rsl[i + j]);
            }
            mix(&mut v);
            self.mem[i..i + 8].copy_from_slice(&v);
        }
        for i in (0..RAND_SIZE).step_by(8) {
            for (j, x) in v.iter_mut().enumerate() {
                *x = x.wrapping_add(self.mem[i + j]);
            }
            mix(&mut v);
            self.mem[i..i + 8].copy_from_slice(&v);
        }

        self.generate();
    }

    fn generate(&mut self) {
        self.c = self.c.wrapping_add(1);
        self.b = self.b.wrapping_add(self.c);

        for i in 0..RAND_SIZE {
            let x = self.mem[i];
            self.a ^= match i % 4 {
                0 => self.a << 13,
                1 => self.a >> 6,
                2 => self.a << 2,
                _ => self.a >> 16,
            };
            self.a = self.mem[(i + RAND_SIZE / 2) % RAND_SIZE].wrapping_add(self.a);
            let y = self.mem[((x >> 2) & 0xff) as usize]
                .wrapping_add(self.a)
                .wrapping_add(self.b);
            self.mem[i] = y;
            self.b = self.mem[((y >> 10) & 0xff) as usize].wrapping_add(x);
            self.rsl[i] = self.b;
        }

        self.cnt = RAND_SIZE;
    }
}

#[inline]
fn mix(v: &mut [u32; 8]) {
    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *v;
    a ^= b << 11;
    d = d.wrapping_add(a);
    b = b.wrapping_add(c);
    b ^= c >> 2;
    e = e.wrapping_add(b);
    c = c.wrapping_add(d);
    c ^= d << 8;
    f = f.wrapping_add(c);
    d = d.wrapping_add(e);
    d ^= e >> 16;
    g = g.wrapping_add(d);
    e = e.wrapping_add(f);
    e ^= f << 10;
    h = h.wrapping_add(e);
    f = f.wrapping_add(g);
    f ^= g >> 4;
    a = a.wrapping_add(f);
    g = g.wrapping_add(h);
    g ^= h << 8;
    b = b.wrapping_add(g);
    h = h.wrapping_add(a);
    h ^= a >> 9;
    c = c.wrapping_add(h);
    a = a.wrapping_add(b);
    *v = [a, b, c, d, e, f, g, h];
}

impl RngCore for Isaac {
    fn next_u32(&mut self) -> u32 {
        if self.cnt == 0 {
            self.generate();
        }
        self.cnt -= 1;
        self.rsl[self.cnt]
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
