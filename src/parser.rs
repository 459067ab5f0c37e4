use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("\"<\" must be followed by an input filename")]
    MissingInput,
    #[error("\">\" must be followed by an output filename")]
    MissingOutput,
    #[error("missing command in `{0}`")]
    EmptyStage(String),
    #[error("empty command")]
    Empty,
}

/// One command of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Trimmed sub-command text, used for job descriptions.
    pub raw: String,
    pub input: Option<String>,
    pub output: Option<String>,
    /// Never empty; `argv[0]` is the program name.
    pub argv: Vec<String>,
}

impl Stage {
    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub background: bool,
}

impl Pipeline {
    /// Stage texts joined the way they appear in `jobs` output.
    pub fn description(&self) -> String {
        self.stages
            .iter()
            .map(|s| s.raw.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

// example 0: ls -l | wc
// example 1: cat < input.txt | grep cargo | wc > output.txt
// example 2: cat<input.txt>output.txt &
pub fn parse(line: &str) -> Result<Pipeline, ParseError> {
    let mut line = line.to_owned();
    // only the first `&` is taken as the background marker
    let background = match line.find('&') {
        Some(pos) => {
            line.remove(pos);
            true
        }
        None => false,
    };
    let line = line.replace('<', " < ").replace('>', " > ");

    let stages = line
        .split('|')
        .filter(|part| !part.is_empty())
        .map(parse_stage)
        .collect::<Result<Vec<_>, _>>()?;
    if stages.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(Pipeline { stages, background })
}

fn parse_stage(part: &str) -> Result<Stage, ParseError> {
    let raw = part.trim().to_owned();
    let mut input = None;
    let mut output = None;
    let mut words = String::new();

    let mut tokens = part.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "<" => input = Some(tokens.next().ok_or(ParseError::MissingInput)?.to_owned()),
            ">" => output = Some(tokens.next().ok_or(ParseError::MissingOutput)?.to_owned()),
            word => {
                words.push(' ');
                words.push_str(word);
            }
        }
    }

    let argv: Vec<String> = words.split_whitespace().map(str::to_owned).collect();
    if argv.is_empty() {
        return Err(ParseError::EmptyStage(raw));
    }
    Ok(Stage {
        raw,
        input,
        output,
        argv,
    })
}
