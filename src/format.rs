//! The printf-like per-letter template language: `%<width>x` field
//! specifiers plus `\n`/`\t`/`\r`/`\b` escapes, parsed once into tokens and
//! rendered per record. Mirrors `parse_field`/`print_field`/`process_fmt`,
//! kept in its own module the way the original's `%`-field machinery is
//! logically separable from the action-letter dispatch in `report.rs`.

use crate::record::{major, minor, Category, TraceRecord};
use crate::tracker::Elapsed;

/// `%D %2c %8s %5T.%9t %5p %2a %3d ` — the common line prefix every
/// default template starts with.
pub const HEADER: &str = "%D %2c %8s %5T.%9t %5p %2a %3d ";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Literal(char),
    Field { letter: char, width: Option<usize>, left_align: bool },
}

/// A parsed template, ready to render against many records without
/// re-parsing the source string each time.
#[derive(Clone, Debug)]
pub struct Template {
    tokens: Vec<Token>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut tokens = Vec::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '%' => match chars.peek() {
                    Some('%') => {
                        chars.next();
                        tokens.push(Token::Literal('%'));
                    }
                    None => tokens.push(Token::Literal('%')),
                    Some(_) => {
                        let left_align = chars.next_if_eq(&'-').is_some();
                        let mut width = None;
                        while let Some(d) = chars.peek().filter(|c| c.is_ascii_digit()) {
                            width = Some(width.unwrap_or(0) * 10 + d.to_digit(10).unwrap() as usize);
                            chars.next();
                        }
                        if let Some(letter) = chars.next() {
                            tokens.push(Token::Field { letter, width, left_align });
                        }
                    }
                },
                '\\' => match chars.next() {
                    Some('n') => tokens.push(Token::Literal('\n')),
                    Some('t') => tokens.push(Token::Literal('\t')),
                    Some('r') => tokens.push(Token::Literal('\r')),
                    Some('b') => tokens.push(Token::Literal('\u{8}')),
                    Some(other) => tokens.push(Token::Literal(other)),
                    None => {}
                },
                other => tokens.push(Token::Literal(other)),
            }
        }
        Template { tokens }
    }

    pub fn render(&self, ctx: &RenderContext<'_>) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(c) => out.push(*c),
                Token::Field { letter, width, left_align } => {
                    render_field(&mut out, *letter, *width, *left_align, ctx)
                }
            }
        }
        out
    }
}

/// Everything a field specifier might need to render itself for one record.
pub struct RenderContext<'a> {
    pub record: &'a TraceRecord,
    pub action_letter: &'a str,
    pub cpu: u32,
    pub elapsed: Elapsed,
}

fn pad(out: &mut String, value: String, width: Option<usize>, left_align: bool) {
    match width {
        Some(w) if left_align => out.push_str(&format!("{:<w$}", value, w = w)),
        Some(w) => out.push_str(&format!("{:>w$}", value, w = w)),
        None => out.push_str(&value),
    }
}

fn render_field(out: &mut String, letter: char, width: Option<usize>, left_align: bool, ctx: &RenderContext<'_>) {
    let t = ctx.record;
    match letter {
        'a' => pad(out, ctx.action_letter.to_string(), width, left_align),
        'c' => pad(out, ctx.cpu.to_string(), width, left_align),
        'C' => pad(out, t.comm_str().into_owned(), width, left_align),
        'd' => {
            let category = t.category();
            let mut rwbs = String::new();
            rwbs.push(if category.contains(Category::WRITE) { 'W' } else { 'R' });
            if category.contains(Category::BARRIER) {
                rwbs.push('B');
            }
            if category.contains(Category::SYNC) {
                rwbs.push('S');
            }
            pad(out, rwbs, width, left_align);
        }
        'D' => out.push_str(&format!("{:>3},{:<3}", major(t.device), minor(t.device))),
        'e' => pad(out, t.error.to_string(), width, left_align),
        'M' => pad(out, major(t.device).to_string(), width, left_align),
        'm' => pad(out, minor(t.device).to_string(), width, left_align),
        'n' => pad(out, (t.bytes >> 9).to_string(), width, left_align),
        'p' => pad(out, t.pid.to_string(), width, left_align),
        'P' => {
            for (i, byte) in t.payload.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(&format!("{:02x}", byte));
            }
        }
        's' => pad(out, t.sequence.to_string(), width, left_align),
        'S' => pad(out, t.sector.to_string(), width, left_align),
        't' => out.push_str(&format!("{:0width$}", t.time % 1_000_000_000, width = width.unwrap_or(9))),
        'T' => pad(out, (t.time / 1_000_000_000).to_string(), width, left_align),
        'u' => match ctx.elapsed {
            Elapsed::Known(ns) => pad(out, (ns / 1000).to_string(), width, left_align),
            Elapsed::Unknown => pad(out, "N/A".to_string(), width, left_align),
        },
        'U' => {
            let depth = t
                .payload
                .get(..8)
                .map(|b| u64::from_be_bytes(b.try_into().unwrap()))
                .unwrap_or(0);
            pad(out, depth.to_string(), width, left_align);
        }
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ActionCode;

    fn sample_record() -> TraceRecord {
        TraceRecord {
            sequence: 5,
            time: 1_500_000_123,
            sector: 200,
            bytes: 4096,
            action: (Category::WRITE.bits() << 16) | ActionCode::Queue as u32,
            pid: 99,
            device: (8 << crate::record::MINOR_BITS) | 1,
            cpu: 0,
            error: 0,
            comm: {
                let mut c = [0u8; 16];
                c[..3].copy_from_slice(b"fio");
                c
            },
            payload: vec![0xde, 0xad],
        }
    }

    #[test]
    fn renders_header_fields_with_widths() {
        let record = sample_record();
        let template = Template::parse(HEADER);
        let ctx = RenderContext {
            record: &record,
            action_letter: "Q",
            cpu: 2,
            elapsed: Elapsed::Unknown,
        };
        let rendered = template.render(&ctx);
        assert!(rendered.contains("  8,1  "));
        assert!(rendered.contains(" 2 "));
        assert!(rendered.contains("       5"));
        assert!(rendered.contains("   99"));
        assert!(rendered.contains(" Q "));
        assert!(rendered.ends_with("  W "));
    }

    #[test]
    fn elapsed_unknown_renders_as_na() {
        let record = sample_record();
        let template = Template::parse("(%8u)");
        let ctx = RenderContext { record: &record, action_letter: "D", cpu: 0, elapsed: Elapsed::Unknown };
        assert_eq!(template.render(&ctx), "(     N/A)");
    }

    #[test]
    fn elapsed_known_divides_to_microseconds() {
        let record = sample_record();
        let template = Template::parse("%u");
        let ctx = RenderContext { record: &record, action_letter: "D", cpu: 0, elapsed: Elapsed::Known(12_345) };
        assert_eq!(template.render(&ctx), "12");
    }

    #[test]
    fn escapes_are_interpreted() {
        let template = Template::parse("a\\nb\\tc");
        let record = sample_record();
        let ctx = RenderContext { record: &record, action_letter: "Q", cpu: 0, elapsed: Elapsed::Unknown };
        assert_eq!(template.render(&ctx), "a\nb\tc");
    }

    #[test]
    fn literal_percent_is_preserved() {
        let template = Template::parse("100%%");
        let record = sample_record();
        let ctx = RenderContext { record: &record, action_letter: "Q", cpu: 0, elapsed: Elapsed::Unknown };
        assert_eq!(template.render(&ctx), "100%");
    }
}
