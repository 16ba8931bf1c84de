//! Interactive selection of the status and omics type when they are not passed
//! on the command line. The reader and writer are generic so the loop can be
//! driven from tests as well as from the terminal.

use std::io::{self, BufRead, Write};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Input closed before a valid {0} was entered.")]
    Closed(&'static str),
    #[error("Terminal IO error: {0}")]
    Io(#[from] io::Error),
}

/// The wording of one question.
#[derive(Debug, Clone, Copy)]
pub struct Question {
    /// Used in the error raised when input runs out.
    pub subject: &'static str,
    pub ask: &'static str,
    pub retry: &'static str,
}

pub const STATUS_QUESTION: Question = Question {
    subject: "status",
    ask: "Please input the status of BRCA: ",
    retry: "Please input the correct status of BRCA.",
};

pub const OMICS_QUESTION: Question = Question {
    subject: "omics type",
    ask: "Please input the type of omics data of BRCA: ",
    retry: "Please input the correct type of omics data of BRCA.",
};

/// Asks `question` until an answer parses as `T`.
pub fn ask_until_valid<T, R, W>(
    input: &mut R,
    output: &mut W,
    question: &Question,
) -> Result<T, PromptError>
where
    T: FromStr,
    R: BufRead,
    W: Write,
{
    let mut line = String::new();
    loop {
        write!(output, "{}", question.ask)?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(PromptError::Closed(question.subject));
        }
        match line.trim().parse::<T>() {
            Ok(value) => return Ok(value),
            Err(_) => {
                log::debug!("Rejected {} answer '{}'", question.subject, line.trim());
                writeln!(output, "{}", question.retry)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::{OmicsKind, Status};
    use std::io::Cursor;

    #[test]
    fn accepts_first_valid_answer() {
        let mut input = Cursor::new("  case_control \n");
        let mut output = Vec::new();
        let status: Status = ask_until_valid(&mut input, &mut output, &STATUS_QUESTION).unwrap();
        assert_eq!(status, Status::CaseControl);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Please input the status of BRCA: "
        );
    }

    #[test]
    fn repeats_question_after_invalid_answers() {
        let mut input = Cursor::new("rna\nMRNA\nmRNA\n");
        let mut output = Vec::new();
        let omics: OmicsKind = ask_until_valid(&mut input, &mut output, &OMICS_QUESTION).unwrap();
        assert_eq!(omics, OmicsKind::MRna);

        let transcript = String::from_utf8(output).unwrap();
        assert_eq!(transcript.matches(OMICS_QUESTION.ask).count(), 3);
        assert_eq!(transcript.matches(OMICS_QUESTION.retry).count(), 2);
    }

    #[test]
    fn end_of_input_is_an_error() {
        let mut input = Cursor::new("stage\n");
        let mut output = Vec::new();
        let err = ask_until_valid::<Status, _, _>(&mut input, &mut output, &STATUS_QUESTION)
            .unwrap_err();
        assert!(matches!(err, PromptError::Closed("status")));
    }
}
