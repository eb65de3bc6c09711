//! Functions to choose items at random.
//!
//! We use these when we want to pick a relay, weighted by bandwidth.

use rand::Rng;

/// Choose a single item from `iterable` with probability proportional
/// to the weight that `weightfn` assigns it.
///
/// Returns None if and only if no element has nonzero weight.
pub(crate) fn pick_weighted<R, I, F, T>(rng: &mut R, iterable: I, weightfn: F) -> Option<T>
where
    I: Iterator<Item = T>,
    F: Fn(&T) -> u64,
    R: Rng,
{
    // This is a functional version of Algorithm R, adjusted for
    // weighted elements: at each step the new candidate replaces the
    // previous winner with probability weight/total.
    let (mut total, mut winner) = (0_u64, None);
    for item in iterable {
        let w = weightfn(&item);
        if w == 0 {
            continue;
        }
        total += w;
        if rng.gen_range(0..total) < w {
            winner = Some(item);
        }
    }
    winner
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_weights_never_chosen() {
        let mut rng = rand::thread_rng();
        let v = vec![("a", 0_u64), ("b", 10), ("c", 0)];
        for _ in 0..50 {
            let got = pick_weighted(&mut rng, v.iter(), |x| x.1).unwrap();
            assert_eq!(got.0, "b");
        }
        let empty = vec![("a", 0_u64)];
        assert!(pick_weighted(&mut rng, empty.iter(), |x| x.1).is_none());
    }

    #[test]
    fn roughly_proportional() {
        let mut rng = rand::thread_rng();
        let v = vec![("light", 1_u64), ("heavy", 99)];
        let mut heavy = 0;
        for _ in 0..1000 {
            if pick_weighted(&mut rng, v.iter(), |x| x.1).unwrap().0 == "heavy" {
                heavy += 1;
            }
        }
        // Loose bound; a false failure here is astronomically unlikely.
        assert!(heavy > 900);
    }
}
