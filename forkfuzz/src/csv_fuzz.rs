//! Parses the seed as rows/cells and runs the deterministic-then-randomised
//! CSV strategy schedule.
//!
//! The original reviewed source keeps this corpus as a doubly-linked list
//! of rows of cells with back-pointers. Here it is an arena: `Vec<Row>` and
//! each row's `Vec<Cell>`, addressed by plain indices instead of pointers,
//! per the Design Notes recommendation — `added` stays a flag, and revert
//! becomes "retain cells/rows with `added == false`, restore snapshots for
//! the rest".

use crate::engine::EngineContext;
use crate::mutate::MutKind;

const MAX_LINES: usize = 10_000;
const MAX_FIELDS: usize = 256;
const MAX_FIELD_LEN: usize = 4096;
const BIG_SIZE: usize = 800;

const INT_TABLE: &[i64] = &[
    -128, -1, 0, 1, 16, 32, 64, 100, 127, -32768, -129, 128, 255, 256, 512, 1000, 1024, 4096,
    32767, i32::MIN as i64, -100_663_046, -32769, 32768, 65535, 65536, 100_663_045,
    i32::MAX as i64, 1337, 2_147_483_648, -2_147_483_649,
];

const FLOAT_TABLE: &[f64] = &[
    0.0,
    -0.0,
    0.333_333_333_333_33,
    std::f64::consts::PI,
    0.1,
    0.100_0000,
    -1.0,
    1.0,
    f64::INFINITY,
    f64::NEG_INFINITY,
    f64::NAN,
    1e308,
    -1e308,
];

const INJECTION_PAYLOADS: &[&str] = &[
    "=1+1",
    "=A1+A2",
    "=SUM(A1:A10)",
    "=cmd|' /C calc'!'A1'",
    "=HYPERLINK(\"http://evil.example\", \"click\")",
    "@SUM(1+1)",
    "+1+1",
    "-1+1",
    "=1+1+cmd|' /C calc'!'A1'",
];

const SPECIAL_CHARS: &[&str] = &[
    "\"", "\"\"", "\\\"", "\n", "\r\n", "\\n", ",", ",,", "\",\"", "\\", "\0", "\t", "'", "`",
    "\u{2028}", "<script>", "${jndi:ldap://x}",
];

const STRUCTURAL_BYTES: &[u8] = b",\n\"\\\r";

#[derive(Debug, Clone)]
struct Cell {
    value: String,
    added: bool,
    orig_value: Option<String>,
}

impl Cell {
    fn original(value: String) -> Self {
        Self {
            orig_value: Some(value.clone()),
            value,
            added: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Row {
    cells: Vec<Cell>,
    added: bool,
    orig_nvals: usize,
}

#[derive(Debug, Clone)]
struct CsvCorpus {
    rows: Vec<Row>,
    orig_nrows: usize,
}

fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() && fields.len() < MAX_FIELDS {
        let mut field = String::new();
        if bytes[i] == b'"' {
            i += 1;
            while i < bytes.len() && field.len() < MAX_FIELD_LEN {
                if bytes[i] == b'"' {
                    if i + 1 < bytes.len() && bytes[i + 1] == b'"' {
                        field.push('"');
                        i += 2;
                    } else {
                        i += 1;
                        break;
                    }
                } else {
                    field.push(bytes[i] as char);
                    i += 1;
                }
            }
            // skip to next comma
            while i < bytes.len() && bytes[i] != b',' {
                i += 1;
            }
            if i < bytes.len() {
                i += 1;
            }
        } else {
            while i < bytes.len() && bytes[i] != b',' && field.len() < MAX_FIELD_LEN {
                field.push(bytes[i] as char);
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b',' {
                i += 1;
            }
        }
        fields.push(field);
    }
    fields
}

fn parse(seed: &[u8]) -> CsvCorpus {
    let text = String::from_utf8_lossy(seed);
    let rows: Vec<Row> = text
        .split('\n')
        .take(MAX_LINES)
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .map(|line| {
            let cells: Vec<Cell> = parse_csv_line(line).into_iter().map(Cell::original).collect();
            let orig_nvals = cells.len();
            Row {
                cells,
                added: false,
                orig_nvals,
            }
        })
        .collect();
    let orig_nrows = rows.len();
    CsvCorpus { rows, orig_nrows }
}

/// Serialises verbatim (no re-quoting), comma-joined, newline-terminated.
fn dump(corpus: &CsvCorpus) -> Vec<u8> {
    let mut out = Vec::new();
    for row in &corpus.rows {
        for (i, cell) in row.cells.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.extend_from_slice(cell.value.as_bytes());
        }
        out.push(b'\n');
    }
    out
}

/// Drops every `added` row/cell; restores `orig_value` for the rest.
fn revert(corpus: &mut CsvCorpus) {
    corpus.rows.retain(|r| !r.added);
    for row in corpus.rows.iter_mut() {
        row.cells.retain(|c| !c.added);
        for cell in row.cells.iter_mut() {
            if let Some(orig) = &cell.orig_value {
                cell.value = orig.clone();
            }
        }
    }
}

pub fn run(seed: &[u8], ctx: &mut EngineContext) -> Result<(), &'static str> {
    let mut corpus = parse(seed);

    buffer_overflow(&mut corpus, ctx);
    bad_nums(&mut corpus, ctx);
    csv_injection(&mut corpus, ctx);
    special_chars(&mut corpus, ctx);
    empty_cells(&mut corpus, ctx);

    while ctx.should_continue() {
        match ctx.rng.rand_range(0, 3) {
            0 => bit_flip(&corpus, ctx),
            1 => add_rows(&mut corpus, ctx),
            2 => add_columns(&mut corpus, ctx),
            _ => mutations(&corpus, ctx),
        }
    }
    Ok(())
}

fn cell_positions(corpus: &CsvCorpus) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    for (r, row) in corpus.rows.iter().enumerate() {
        for c in 0..row.cells.len() {
            out.push((r, c));
        }
    }
    out
}

fn buffer_overflow(corpus: &mut CsvCorpus, ctx: &mut EngineContext) {
    let big = "A".repeat(BIG_SIZE);
    for (r, c) in cell_positions(corpus) {
        let original = corpus.rows[r].cells[c].value.clone();
        corpus.rows[r].cells[c].value = big.clone();
        ctx.dispatch(&dump(corpus));
        corpus.rows[r].cells[c].value = original;
    }
    revert(corpus);
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f == f64::INFINITY {
        "Infinity".to_string()
    } else if f == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        format_g(f, 15)
    }
}

fn trim_trailing_fraction(s: &mut String) {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
}

/// `%.<precision>g`-equivalent: `precision` significant digits, switching to
/// scientific notation when the exponent is `< -4` or `>= precision`, with
/// trailing fractional zeros trimmed either way. `format!("{f:.N}")` gives
/// digits *after the decimal point*, not significant digits, so large or
/// small magnitudes need this rather than a fixed-point format string.
fn format_g(f: f64, precision: i32) -> String {
    if f == 0.0 {
        return if f.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }
    let negative = f.is_sign_negative();
    let mag = f.abs();

    let sci = format!("{:.*e}", (precision - 1) as usize, mag);
    let (mantissa_str, exp_str) = sci.split_once('e').expect("LowerExp always emits 'e'");
    let exp: i32 = exp_str.parse().expect("LowerExp exponent is a plain integer");
    let digits: String = mantissa_str.chars().filter(|c| *c != '.').collect();

    let body = if exp < -4 || exp >= precision {
        let mut mantissa = if digits.len() > 1 {
            format!("{}.{}", &digits[..1], &digits[1..])
        } else {
            digits.clone()
        };
        trim_trailing_fraction(&mut mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        let exp_digits = exp.unsigned_abs();
        if exp_digits < 10 {
            format!("{mantissa}e{sign}0{exp_digits}")
        } else {
            format!("{mantissa}e{sign}{exp_digits}")
        }
    } else if exp >= 0 {
        let int_len = (exp + 1) as usize;
        let mut s = if digits.len() > int_len {
            format!("{}.{}", &digits[..int_len], &digits[int_len..])
        } else {
            let mut whole = digits.clone();
            whole.push_str(&"0".repeat(int_len - digits.len()));
            whole
        };
        trim_trailing_fraction(&mut s);
        s
    } else {
        let zeros = (-exp - 1) as usize;
        let mut s = format!("0.{}{}", "0".repeat(zeros), digits);
        trim_trailing_fraction(&mut s);
        s
    };

    if negative { format!("-{body}") } else { body }
}

fn bad_nums(corpus: &mut CsvCorpus, ctx: &mut EngineContext) {
    for (r, c) in cell_positions(corpus) {
        let original = corpus.rows[r].cells[c].value.clone();
        for &n in INT_TABLE {
            corpus.rows[r].cells[c].value = n.to_string();
            ctx.dispatch(&dump(corpus));
        }
        for &f in FLOAT_TABLE {
            corpus.rows[r].cells[c].value = format_float(f);
            ctx.dispatch(&dump(corpus));
        }
        corpus.rows[r].cells[c].value = original;
    }
}

fn csv_injection(corpus: &mut CsvCorpus, ctx: &mut EngineContext) {
    for (r, c) in cell_positions(corpus) {
        let original = corpus.rows[r].cells[c].value.clone();
        for payload in INJECTION_PAYLOADS {
            corpus.rows[r].cells[c].value = payload.to_string();
            ctx.dispatch(&dump(corpus));
        }
        corpus.rows[r].cells[c].value = original;
    }
}

fn special_chars(corpus: &mut CsvCorpus, ctx: &mut EngineContext) {
    for (r, c) in cell_positions(corpus) {
        let original = corpus.rows[r].cells[c].value.clone();
        for payload in SPECIAL_CHARS {
            corpus.rows[r].cells[c].value = payload.to_string();
            ctx.dispatch(&dump(corpus));
        }
        corpus.rows[r].cells[c].value = original;
    }
}

fn empty_cells(corpus: &mut CsvCorpus, ctx: &mut EngineContext) {
    for (r, c) in cell_positions(corpus) {
        let original = corpus.rows[r].cells[c].value.clone();
        corpus.rows[r].cells[c].value = String::new();
        ctx.dispatch(&dump(corpus));
        corpus.rows[r].cells[c].value = original;
    }
    revert(corpus);
}

fn bit_flip(corpus: &CsvCorpus, ctx: &mut EngineContext) {
    let mut bytes = dump(corpus);
    let positions: Vec<usize> = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| STRUCTURAL_BYTES.contains(b))
        .map(|(i, _)| i)
        .collect();
    if positions.is_empty() {
        return;
    }
    let which = ctx.rng.rand_range(0, positions.len() as i64 - 1) as usize;
    let base = positions[which];
    let delta = ctx.rng.rand_range(0, 5) as usize;
    let offset = base + delta;
    if offset >= bytes.len() {
        return;
    }
    let shift = ctx.rng.rand_range(1, 7) as u32;
    bytes[offset] = bytes[offset].wrapping_shl(shift);
    ctx.dispatch(&bytes);
}

/// By default does not revert: row growth accumulates until a reverting
/// strategy runs, matching the reviewed source's (intentional, per the
/// resolved Open Question) behaviour. `revert_after_structural_growth`
/// switches that off on a per-run basis.
fn add_rows(corpus: &mut CsvCorpus, ctx: &mut EngineContext) {
    let Some(last) = corpus.rows.last().cloned() else { return };
    corpus.rows.push(Row {
        cells: last.cells.into_iter().map(|c| Cell {
            value: c.value,
            added: true,
            orig_value: None,
        }).collect(),
        added: true,
        orig_nvals: 0,
    });
    ctx.dispatch(&dump(corpus));
    if ctx.config.revert_after_structural_growth {
        revert(corpus);
    }
}

/// Same revert policy as `add_rows`.
fn add_columns(corpus: &mut CsvCorpus, ctx: &mut EngineContext) {
    let Some(first_row) = corpus.rows.first() else { return };
    if first_row.cells.is_empty() {
        return;
    }
    let col = ctx.rng.rand_range(0, first_row.cells.len() as i64 - 1) as usize;
    let template = first_row.cells[col].value.clone();
    for row in corpus.rows.iter_mut() {
        row.cells.push(Cell {
            value: template.clone(),
            added: true,
            orig_value: None,
        });
    }
    ctx.dispatch(&dump(corpus));
    if ctx.config.revert_after_structural_growth {
        revert(corpus);
    }
}

fn mutations(corpus: &CsvCorpus, ctx: &mut EngineContext) {
    let bytes = dump(corpus);
    let kind: MutKind = ctx.selector.pick("csv", &mut ctx.rng);
    if let Some(mutated) = ctx.selector.mutate(&bytes, kind, "csv", &mut ctx.rng) {
        ctx.dispatch(&mutated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_rows_and_columns() {
        let corpus = parse(b"a,b,c\n1,2,3\n4,5,6\n");
        assert_eq!(corpus.rows.len(), 4); // trailing empty line from final \n
        assert_eq!(corpus.rows[0].cells.len(), 3);
        assert_eq!(corpus.rows[1].cells[1].value, "2");
    }

    #[test]
    fn quoted_fields_unescape_doubled_quotes() {
        let corpus = parse(b"\"a\"\"b\",c\n");
        assert_eq!(corpus.rows[0].cells[0].value, "a\"b");
    }

    #[test]
    fn dump_is_verbatim_no_requoting() {
        let corpus = parse(b"a,b\n");
        let out = dump(&corpus);
        assert_eq!(&out[..4], b"a,b\n");
    }

    #[test]
    fn revert_drops_added_rows_and_restores_snapshots() {
        let mut corpus = parse(b"a,b\n1,2\n");
        let orig_rows = corpus.rows.len();
        corpus.rows.push(Row {
            cells: vec![Cell { value: "x".into(), added: true, orig_value: None }],
            added: true,
            orig_nvals: 0,
        });
        corpus.rows[0].cells[0].value = "MUTATED".to_string();
        revert(&mut corpus);
        assert_eq!(corpus.rows.len(), orig_rows);
        assert_eq!(corpus.rows[0].cells[0].value, "a");
    }

    #[test]
    fn buffer_overflow_table_uses_800_byte_fill() {
        assert_eq!(BIG_SIZE, 800);
    }

    #[test]
    fn format_float_uses_15_significant_digits_not_15_decimal_places() {
        assert_eq!(format_float(std::f64::consts::PI), "3.14159265358979");
    }

    #[test]
    fn format_float_switches_to_scientific_past_the_exponent_threshold() {
        assert_eq!(format_float(1e308), "1e+308");
        assert_eq!(format_float(-1e308), "-1e+308");
    }

    #[test]
    fn format_float_keeps_literal_non_finite_names() {
        assert_eq!(format_float(f64::NAN), "NaN");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn format_float_trims_trailing_zeros_in_fixed_notation() {
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-1.0), "-1");
    }
}
