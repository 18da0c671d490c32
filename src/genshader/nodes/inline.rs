use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// `{{name}}`: replaced by the expression feeding input `name`.
    Port(String),
}

/// Parsed inline expression such as `mix({{bg}}, {{fg}}, {{mix}})`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineTemplate {
    segments: Vec<Segment>,
}

impl InlineTemplate {
    pub fn parse(text: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = text;
        let mut offset = 0;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                Error::MalformedTemplate(format!(
                    "unterminated '{{{{' at offset {} in '{text}'",
                    offset + start
                ))
            })?;
            let port = after[..end].trim();
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Error::MalformedTemplate(format!(
                    "invalid port name '{port}' in '{text}'"
                )));
            }
            segments.push(Segment::Port(port.to_string()));
            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(InlineTemplate { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn ports(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Port(p) => Some(p.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Fail on the first port that is not one of `known`.
    pub fn check_ports(&self, known: &[&str], owner: &str) -> Result<()> {
        match self.ports().find(|p| !known.contains(p)) {
            Some(p) => Err(Error::MalformedTemplate(format!(
                "'{owner}' references unknown port '{p}'"
            ))),
            None => Ok(()),
        }
    }

    pub fn render(&self, mut resolve: impl FnMut(&str) -> Result<String>) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Port(port) => out.push_str(&resolve(port)?),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ports_and_literals() {
        let t = InlineTemplate::parse("mix({{bg}}, {{fg}}, {{ mix }})").unwrap();
        assert_eq!(t.ports().collect::<Vec<_>>(), ["bg", "fg", "mix"]);
        let out = t.render(|p| Ok(format!("<{p}>"))).unwrap();
        assert_eq!(out, "mix(<bg>, <fg>, <mix>)");
    }

    #[test]
    fn unterminated_port_is_malformed() {
        let err = InlineTemplate::parse("{{in1}} + {{in2").unwrap_err();
        assert_eq!(err.kind(), "MalformedTemplate");
    }

    #[test]
    fn unknown_port_is_reported() {
        let t = InlineTemplate::parse("{{in1}} + {{in3}}").unwrap();
        let err = t.check_ports(&["in1", "in2"], "IM_add_float").unwrap_err();
        assert!(matches!(err, Error::MalformedTemplate(m) if m.contains("in3")));
    }
}
