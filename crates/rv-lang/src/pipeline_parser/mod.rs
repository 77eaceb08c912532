//! Statement and block parser for pipeline source.
//!
//! Works on tokenized text (see [`crate::literals`]), so the byte scanner
//! below never has to reason about quotes. Statements end at a top-level
//! newline or `;`; a top-level `>>` ends a block header and opens the block,
//! a top-level `<<` closes the innermost open block.

use crate::error::{Fault, ParseError, Position, Span};
use crate::expr_parser::compile_fragment;
use crate::literals::{OffsetMap, extract_literals};
use crate::program::{
    ForkBlock, JoinStrategy, MergeStrategy, Program, SplitBlock, StageDesc, StageMode, Step,
};


// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Parse pipeline source into a [`Program`]. All expressions are compiled to
/// logic trees; errors carry source positions.
pub fn parse_pipeline(source: &str) -> Result<Program, ParseError> {
    let extracted = extract_literals(source)?;
    let mut literals = extracted.literals;
    let mut scanner = Scanner {
        text: &extracted.text,
        pos: 0,
        limit: extracted.text.len(),
        literals: &mut literals,
        source,
        map: &extracted.map,
    };
    scanner
        .sequence(Block::Top)
        .map(|items| Program::new(flatten(items)))
        .map_err(|fault| fault.map(&extracted.map).into_error(source))
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

struct Scanner<'a> {
    text: &'a str,
    pos: usize,
    /// End of the region being scanned; narrower than `text` inside a
    /// parenthesised statement group.
    limit: usize,
    literals: &'a mut Vec<String>,
    source: &'a str,
    map: &'a OffsetMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Separator,
    Eof,
    Open,
    Close,
}

/// Trimmed statement range plus what terminated it.
#[derive(Debug, Clone, Copy)]
struct Statement {
    start: usize,
    end: usize,
    ending: Ending,
}

impl Statement {
    fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Top,
    Body,
    /// A fork body, where `(a), (b; c)` lists several branches.
    Fork,
}

/// A statement in a sequence: a single step, or a parenthesised group that
/// forms one fork branch.
enum Item {
    Step(Step),
    Group(Vec<Step>),
}

fn flatten(items: Vec<Item>) -> Vec<Step> {
    items
        .into_iter()
        .flat_map(|item| match item {
            Item::Step(step) => vec![step],
            Item::Group(steps) => steps,
        })
        .collect()
}

impl Scanner<'_> {
    fn sequence(&mut self, block: Block) -> Result<Vec<Item>, Fault> {
        let mut items = Vec::new();
        loop {
            let stmt = self.statement()?;
            match stmt.ending {
                Ending::Open => {
                    let step = self.block(stmt)?;
                    items.push(Item::Step(step));
                }
                Ending::Separator => self.push_item(stmt, block, &mut items)?,
                Ending::Close => {
                    self.push_item(stmt, block, &mut items)?;
                    if block == Block::Top {
                        return Err(Fault::new(self.pos, ["statement"]));
                    }
                    return Ok(items);
                }
                Ending::Eof => {
                    self.push_item(stmt, block, &mut items)?;
                    if block != Block::Top {
                        return Err(Fault::new(self.pos, ["'<<' closing the block"]));
                    }
                    return Ok(items);
                }
            }
        }
    }

    /// Scan one statement starting at `self.pos`. On `<<` the scanner stops
    /// in front of it so the enclosing block can consume it.
    fn statement(&mut self) -> Result<Statement, Fault> {
        let bytes = self.text.as_bytes();
        let start = self.pos;
        let mut open: Vec<(u8, usize)> = Vec::new();
        let mut i = start;
        let (end, ending) = loop {
            if i >= self.limit {
                if let Some(&(opener, _)) = open.last() {
                    return Err(Fault::new(i, [closing(opener)]));
                }
                self.pos = i;
                break (i, Ending::Eof);
            }
            match bytes[i] {
                b @ (b'(' | b'[' | b'{') => open.push((b, i)),
                b @ (b')' | b']' | b'}') => match open.pop() {
                    Some((opener, _)) if matches_closer(opener, b) => {}
                    Some((opener, _)) => return Err(Fault::new(i, [closing(opener)])),
                    None => return Err(Fault::new(i, ["statement"])),
                },
                b'\n' | b';' if open.is_empty() => {
                    self.pos = i + 1;
                    break (i, Ending::Separator);
                }
                b'>' if open.is_empty() && bytes.get(i + 1) == Some(&b'>') => {
                    self.pos = i + 2;
                    break (i, Ending::Open);
                }
                b'<' if open.is_empty() && bytes.get(i + 1) == Some(&b'<') => {
                    self.pos = i;
                    break (i, Ending::Close);
                }
                _ => {}
            }
            i += 1;
        };
        let (start, end) = trim(self.text, start, end);
        Ok(Statement { start, end, ending })
    }

    fn push_item(&mut self, stmt: Statement, block: Block, items: &mut Vec<Item>) -> Result<(), Fault> {
        if stmt.is_empty() {
            return Ok(());
        }
        if block == Block::Fork
            && let Some(groups) = self.group_list(stmt)
        {
            for (start, end) in groups {
                let steps = self.group(start, end)?;
                items.push(Item::Group(steps));
            }
            return Ok(());
        }
        if let Some(inner_end) = self.group_end(stmt) {
            let steps = self.group(stmt.start + 1, inner_end)?;
            items.push(Item::Group(steps));
        } else {
            let stage = self.stage(stmt.start, stmt.end)?;
            items.push(Item::Step(Step::Stage(stage)));
        }
        Ok(())
    }

    /// Offset of the bracket closing the one at `open`, searching before
    /// `end`.
    fn matching_close(&self, open: usize, end: usize) -> Option<usize> {
        let bytes = self.text.as_bytes();
        let mut depth = 0usize;
        for (i, b) in bytes.iter().enumerate().take(end).skip(open) {
            match b {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// If the whole statement is wrapped in one pair of parentheses, the
    /// offset of the closing one.
    fn group_end(&self, stmt: Statement) -> Option<usize> {
        if self.text.as_bytes()[stmt.start] != b'(' {
            return None;
        }
        let close = self.matching_close(stmt.start, stmt.end)?;
        (close + 1 == stmt.end).then_some(close)
    }

    /// Inner spans of `(a), (b; c)`: two or more parenthesised groups
    /// separated by top-level commas and nothing else.
    fn group_list(&self, stmt: Statement) -> Option<Vec<(usize, usize)>> {
        let bytes = self.text.as_bytes();
        let skip_ws = |mut i: usize| {
            while i < stmt.end && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            i
        };
        let mut groups = Vec::new();
        let mut i = stmt.start;
        loop {
            i = skip_ws(i);
            if bytes.get(i) != Some(&b'(') || i >= stmt.end {
                return None;
            }
            let close = self.matching_close(i, stmt.end)?;
            groups.push((i + 1, close));
            i = skip_ws(close + 1);
            if i == stmt.end {
                return (groups.len() > 1).then_some(groups);
            }
            if bytes[i] != b',' {
                return None;
            }
            i += 1;
        }
    }

    fn group(&mut self, start: usize, end: usize) -> Result<Vec<Step>, Fault> {
        let saved = (self.pos, self.limit);
        self.pos = start;
        self.limit = end;
        let items = self.sequence(Block::Top);
        (self.pos, self.limit) = saved;
        items.map(flatten)
    }

    fn block(&mut self, header: Statement) -> Result<Step, Fault> {
        if header.is_empty() {
            return Err(Fault::new(header.start, ["stage before '>>'"]));
        }
        let text = self.text;
        let head = &text[header.start..header.end];
        let word_len = head.find(char::is_whitespace).unwrap_or(head.len());

        if &head[..word_len] == "fork" {
            let rest_start = header.start + word_len;
            let (rest_start, rest_end) = trim(text, rest_start, header.end);
            let keyword = &text[rest_start..rest_end];
            let join = if keyword.is_empty() {
                JoinStrategy::Merge
            } else {
                JoinStrategy::from_keyword(keyword).ok_or_else(|| {
                    Fault::new(rest_start, ["merge", "zip", "race", "concat"])
                })?
            };

            let items = self.sequence(Block::Fork)?;
            self.pos += 2;
            let trailer = self.trailer()?;
            if !trailer.is_empty() {
                return Err(Fault::new(trailer.start, ["end of statement after fork block"]));
            }
            if items.is_empty() {
                return Err(Fault::new(header.start, ["fork block with at least one branch"]));
            }
            let branches = items
                .into_iter()
                .map(|item| match item {
                    Item::Step(step) => Program::new(vec![step]),
                    Item::Group(steps) => Program::new(steps),
                })
                .collect();
            return Ok(Step::Fork(ForkBlock { join, branches }));
        }

        let head = self.stage(header.start, header.end)?;
        let items = self.sequence(Block::Body)?;
        self.pos += 2;
        let trailer = self.trailer()?;
        let merge = self.merge_strategy(trailer)?;
        Ok(Step::Split(SplitBlock {
            head,
            body: Program::new(flatten(items)),
            merge,
        }))
    }

    /// Text between a block's closing `<<` and the end of its statement.
    fn trailer(&mut self) -> Result<Statement, Fault> {
        let stmt = self.statement()?;
        if stmt.ending == Ending::Open {
            return Err(Fault::new(stmt.end, ["end of statement"]));
        }
        Ok(stmt)
    }

    fn merge_strategy(&self, trailer: Statement) -> Result<MergeStrategy, Fault> {
        let words: Vec<&str> = self.text[trailer.start..trailer.end].split_whitespace().collect();
        let limit = |word: &str| match word.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(Fault::new(trailer.start, ["positive concurrency limit"])),
        };
        match words.as_slice() {
            [] | ["merge"] => Ok(MergeStrategy::Merge { limit: None }),
            ["merge", n] => Ok(MergeStrategy::Merge { limit: limit(n)? }),
            ["concat"] => Ok(MergeStrategy::Concat),
            [n] if n.starts_with(|c: char| c.is_ascii_digit()) => {
                Ok(MergeStrategy::Merge { limit: limit(n)? })
            }
            _ => Err(Fault::new(trailer.start, ["merge", "merge <limit>", "concat"])),
        }
    }

    fn stage(&mut self, start: usize, end: usize) -> Result<StageDesc, Fault> {
        let text = self.text;
        let stmt = &text[start..end];
        let (mode, skip) = match stmt.as_bytes() {
            [b'!', ..] => (StageMode::Accumulator, 1),
            [b'#', next, ..] if next.is_ascii_alphabetic() || *next == b'_' => {
                (StageMode::Immediate, 1)
            }
            _ => (StageMode::Normal, 0),
        };

        let name_start = start + skip;
        let body = &text[name_start..end];
        let name_len = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(body.len());
        let operator = &body[..name_len];
        if !operator.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            return Err(Fault::new(name_start, ["operator name"]));
        }
        if operator == "fork" {
            return Err(Fault::new(name_start + name_len, ["'>>' opening the fork block"]));
        }
        let args_start = name_start + name_len;
        if args_start < end && !body[name_len..].starts_with(char::is_whitespace) {
            return Err(Fault::new(args_start, ["whitespace after operator name"]));
        }

        let mut exprs = Vec::new();
        if !text[args_start..end].trim().is_empty() {
            for (piece_start, piece_end) in split_commas(text, args_start, end) {
                let (piece_start, piece_end) = trim(text, piece_start, piece_end);
                if piece_start == piece_end {
                    return Err(Fault::new(piece_start, ["expression"]));
                }
                let logic = compile_fragment(&text[piece_start..piece_end], self.literals)
                    .map_err(|fault| fault.shift(piece_start))?;
                exprs.push(logic);
            }
        }

        Ok(StageDesc {
            operator: operator.to_string(),
            exprs,
            mode,
            span: self.span(start, end),
        })
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span {
            start: Position::locate(self.source, self.map.to_input(start)),
            end: Position::locate(self.source, self.map.to_input(end)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Split `text[start..end]` on commas outside any brackets.
fn split_commas(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut piece_start = start;
    for (i, b) in text.as_bytes()[start..end].iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                pieces.push((piece_start, start + i));
                piece_start = start + i + 1;
            }
            _ => {}
        }
    }
    pieces.push((piece_start, end));
    pieces
}

fn trim(text: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &text[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading == slice.len() {
        return (start, start);
    }
    (start + leading, end - trailing)
}

fn matches_closer(opener: u8, closer: u8) -> bool {
    matches!((opener, closer), (b'(', b')') | (b'[', b']') | (b'{', b'}'))
}

fn closing(opener: u8) -> &'static str {
    match opener {
        b'(' => "')'",
        b'[' => "']'",
        _ => "'}'",
    }
}
