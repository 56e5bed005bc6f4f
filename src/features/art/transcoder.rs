//! ANSI SGR 颜色码 → 内联样式 HTML
//!
//! 纯函数，无 I/O、无共享状态，可在任意线程并发调用。

use std::fmt::Write as _;

/// 单个 CSI 序列的参数长度上限，超出即视为畸形序列，整段丢弃直到终止字节
const MAX_CSI_LEN: usize = 64;

const ESC: char = '\u{1b}';

/// 标准 16 色调色板（索引 0..16）
const ANSI_16: [Rgb; 16] = [
    Rgb::new(0x00, 0x00, 0x00),
    Rgb::new(0x88, 0x00, 0x00),
    Rgb::new(0x00, 0x88, 0x00),
    Rgb::new(0x88, 0x88, 0x00),
    Rgb::new(0x00, 0x00, 0x88),
    Rgb::new(0x88, 0x00, 0x88),
    Rgb::new(0x00, 0x88, 0x88),
    Rgb::new(0xcc, 0xcc, 0xcc),
    Rgb::new(0x88, 0x88, 0x88),
    Rgb::new(0xff, 0x00, 0x00),
    Rgb::new(0x00, 0xff, 0x00),
    Rgb::new(0xff, 0xff, 0x00),
    Rgb::new(0x00, 0x00, 0xff),
    Rgb::new(0xff, 0x00, 0xff),
    Rgb::new(0x00, 0xff, 0xff),
    Rgb::new(0xff, 0xff, 0xff),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// 当前生效的样式：前景色 / 背景色各自可缺省
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub fg: Option<Rgb>,
    pub bg: Option<Rgb>,
}

impl Style {
    pub fn is_plain(&self) -> bool {
        self.fg.is_none() && self.bg.is_none()
    }

    fn css(&self) -> String {
        let mut parts = Vec::with_capacity(2);
        if let Some(Rgb { r, g, b }) = self.fg {
            parts.push(format!("color:rgb({r},{g},{b})"));
        }
        if let Some(Rgb { r, g, b }) = self.bg {
            parts.push(format!("background:rgb({r},{g},{b})"));
        }
        parts.join(";")
    }
}

/// 一段文本及其样式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSegment {
    pub text: String,
    pub style: Style,
}

/// 一条被识别的 SGR 指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SgrAction {
    Reset,
    Foreground(Rgb),
    Background(Rgb),
}

enum ParseState {
    Plain,
    Escape,
    Csi(String),
    /// 超长 CSI：吞掉剩余参数直到终止字节
    Discard,
}

/// 把 ANSI 文本转换为 HTML 片段
pub fn to_markup(ansi: &str) -> String {
    render_markup(&parse_segments(ansi))
}

/// 扫描输入，产出有序的 (文本, 样式) 段。
///
/// 永不失败：孤立或截断的 ESC、不支持的 CSI 序列都被直接删除。
pub fn parse_segments(ansi: &str) -> Vec<StyledSegment> {
    let mut segments: Vec<StyledSegment> = Vec::new();
    let mut style = Style::default();
    let mut text = String::new();
    let mut state = ParseState::Plain;

    for ch in ansi.chars() {
        state = match state {
            ParseState::Plain => {
                if ch == ESC {
                    ParseState::Escape
                } else {
                    text.push(ch);
                    ParseState::Plain
                }
            }
            ParseState::Escape => match ch {
                '[' => ParseState::Csi(String::new()),
                // 孤立的 ESC 被丢弃，后续字符照常作为文本
                ESC => ParseState::Escape,
                _ => {
                    text.push(ch);
                    ParseState::Plain
                }
            },
            ParseState::Csi(mut params) => {
                if ('\u{40}'..='\u{7e}').contains(&ch) {
                    if ch == 'm' {
                        if let Some(action) = interpret_sgr(&params) {
                            flush(&mut text, style, &mut segments);
                            style = apply(style, action);
                        }
                    }
                    ParseState::Plain
                } else if params.len() >= MAX_CSI_LEN {
                    ParseState::Discard
                } else {
                    params.push(ch);
                    ParseState::Csi(params)
                }
            }
            ParseState::Discard => {
                if ('\u{40}'..='\u{7e}').contains(&ch) {
                    ParseState::Plain
                } else {
                    ParseState::Discard
                }
            }
        };
    }

    flush(&mut text, style, &mut segments);
    segments
}

/// 把累积的文本并入段序列，样式相同的相邻段合并
fn flush(text: &mut String, style: Style, segments: &mut Vec<StyledSegment>) {
    if text.is_empty() {
        return;
    }
    match segments.last_mut() {
        Some(last) if last.style == style => last.text.push_str(text),
        _ => segments.push(StyledSegment {
            text: std::mem::take(text),
            style,
        }),
    }
    text.clear();
}

fn apply(style: Style, action: SgrAction) -> Style {
    match action {
        SgrAction::Reset => Style::default(),
        SgrAction::Foreground(rgb) => Style {
            fg: Some(rgb),
            ..style
        },
        SgrAction::Background(rgb) => Style {
            bg: Some(rgb),
            ..style
        },
    }
}

/// 只识别四种形式：`0`、`38;2;R;G;B`、`48;2;R;G;B`、`38;5;N`，其余一律忽略
fn interpret_sgr(params: &str) -> Option<SgrAction> {
    if params == "0" {
        return Some(SgrAction::Reset);
    }

    let numbers = params
        .split(';')
        .map(|p| {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            p.parse::<u64>().ok()
        })
        .collect::<Option<Vec<u64>>>()?;

    match numbers.as_slice() {
        [38, 2, r, g, b] => Some(SgrAction::Foreground(rgb_clamped(*r, *g, *b))),
        [48, 2, r, g, b] => Some(SgrAction::Background(rgb_clamped(*r, *g, *b))),
        [38, 5, n] => u8::try_from(*n)
            .ok()
            .map(|n| SgrAction::Foreground(palette_256(n))),
        _ => None,
    }
}

fn rgb_clamped(r: u64, g: u64, b: u64) -> Rgb {
    let clamp = |v: u64| v.min(255) as u8;
    Rgb::new(clamp(r), clamp(g), clamp(b))
}

/// 256 色索引 → RGB：0..16 查表，16..232 为 6×6×6 色立方，232.. 为灰阶
pub fn palette_256(n: u8) -> Rgb {
    match n {
        0..=15 => ANSI_16[n as usize],
        16..=231 => {
            let i = n - 16;
            Rgb::new((i / 36) * 51, (i / 6 % 6) * 51, (i % 6) * 51)
        }
        _ => {
            let gray = (n - 232) * 10 + 8;
            Rgb::new(gray, gray, gray)
        }
    }
}

/// 段序列 → HTML；同一时刻最多一个打开的 span
pub fn render_markup(segments: &[StyledSegment]) -> String {
    let mut out = String::with_capacity(segments.iter().map(|s| s.text.len() + 48).sum());
    for segment in segments {
        if segment.style.is_plain() {
            push_escaped(&mut out, &segment.text);
        } else {
            let _ = write!(out, "<span style=\"{}\">", segment.style.css());
            push_escaped(&mut out, &segment.text);
            out.push_str("</span>");
        }
    }
    out
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}
