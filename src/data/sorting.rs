use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::model::{SlideInfo, StainClass};

// ---------------------------------------------------------------------------
// Natural ordering ("2" < "10", "B2" < "B10")
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn chunks(s: &str) -> impl Iterator<Item = Chunk<'_>> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let is_digit = first.is_ascii_digit();
        let end = rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != is_digit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(end);
        rest = tail;
        Some(if is_digit {
            Chunk::Digits(head)
        } else {
            Chunk::Text(head)
        })
    })
}

fn cmp_chunk(a: Chunk<'_>, b: Chunk<'_>) -> Ordering {
    match (a, b) {
        (Chunk::Digits(x), Chunk::Digits(y)) => {
            let xt = x.trim_start_matches('0');
            let yt = y.trim_start_matches('0');
            xt.len()
                .cmp(&yt.len())
                .then_with(|| xt.cmp(yt))
                .then_with(|| x.len().cmp(&y.len()))
        }
        (Chunk::Text(x), Chunk::Text(y)) => x.cmp(y),
        // Numbers sort before words.
        (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
        (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
    }
}

/// Compare two strings treating embedded digit runs as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = cmp_chunk(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Specimen numbers
// ---------------------------------------------------------------------------

const ROMAN: [(u32, &str); 13] = [
    (1000, "M"),
    (900, "CM"),
    (500, "D"),
    (400, "CD"),
    (100, "C"),
    (90, "XC"),
    (50, "L"),
    (40, "XL"),
    (10, "X"),
    (9, "IX"),
    (5, "V"),
    (4, "IV"),
    (1, "I"),
];

/// Archive specimen numbers are roman numerals; numeric input is converted,
/// anything else is returned unchanged.
pub fn number_to_roman(value: &str) -> String {
    let mut n = match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => return value.to_string(),
    };
    let mut roman = String::new();
    for (step, numeral) in ROMAN {
        while n >= step {
            roman.push_str(numeral);
            n -= step;
        }
    }
    roman
}

/// Comma-separated, naturally sorted set of specimen numbers (`''` for blanks).
pub fn specimen_numbers(slides: &[SlideInfo]) -> String {
    let unique: BTreeSet<&str> = slides.iter().map(|s| s.specimen_nr.as_str()).collect();
    let mut numbers: Vec<&str> = unique
        .into_iter()
        .map(|s| if s.is_empty() { "''" } else { s })
        .collect();
    numbers.sort_by(|a, b| natural_cmp(a, b));
    numbers.join(", ")
}

// ---------------------------------------------------------------------------
// Slide order
// ---------------------------------------------------------------------------

/// Order in which slides are presented: specimen number, block, H&E before
/// IHC, staining name, then source position.
pub fn slide_order(slides: &[SlideInfo]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..slides.len()).collect();
    order.sort_by(|&a, &b| {
        let (sa, sb) = (&slides[a], &slides[b]);
        natural_cmp(&sa.specimen_nr, &sb.specimen_nr)
            .then_with(|| natural_cmp(&sa.block, &sb.block))
            .then_with(|| (sa.stain != StainClass::He).cmp(&(sb.stain != StainClass::He)))
            .then_with(|| natural_cmp(&sa.staining, &sb.staining))
            .then_with(|| a.cmp(&b))
    });
    order
}
