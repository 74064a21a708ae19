//! Result-set consumption on top of the token reader

use std::sync::Arc;

use crate::connection::WireLink;
use crate::descriptor::ColumnDesc;
use crate::diagnostics::{DiagRecord, Diagnostics};
use crate::error::{OdbcError, Result, ServerMessage};
use crate::marshal;
use crate::value::Value;
use crate::wire::{DoneStatus, ParamDef, Token, TokenReader};

/// Next thing a response yields at a result boundary
#[derive(Debug)]
pub(crate) enum Outcome {
    /// A row set with these columns; rows follow
    Rows(Vec<ColumnDesc>),
    /// A statement without a row set finished
    Count(Option<u64>),
    /// Nothing left in the response
    Exhausted,
}

/// Within a row set
#[derive(Debug)]
pub(crate) enum RowEvent {
    Row(Vec<Value>),
    End(DoneStatus),
}

/// Describe tokens of a prepare response
#[derive(Debug, Default)]
pub(crate) struct Description {
    pub(crate) params: Option<Vec<ParamDef>>,
    pub(crate) columns: Vec<ColumnDesc>,
}

/// One response, consumed a result at a time.
///
/// Messages that follow a pending error are held with it so the records come
/// out in arrival order. Link failures mark the connection dead; environment changes update its
/// transaction state as soon as they are read.
pub(crate) struct Response {
    reader: TokenReader,
    link: Arc<WireLink>,
    errors: Vec<ServerMessage>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("pending_errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl Response {
    pub(crate) fn new(reader: TokenReader, link: Arc<WireLink>) -> Self {
        Self {
            reader,
            link,
            errors: Vec::new(),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        let token = self.reader.next_token();
        if let Err(error) = &token {
            if error.is_link_failure() {
                self.link.fail(error);
            }
        }
        token
    }

    /// Handle tokens that may appear anywhere; returns the rest
    fn side_channel(&mut self, token: Token, diagnostics: &mut Diagnostics) -> Option<Token> {
        match token {
            Token::Error(message) => {
                self.errors.push(message);
                None
            }
            Token::Info(message) if self.errors.is_empty() => {
                diagnostics.push(DiagRecord::info(message.number, &message.message));
                None
            }
            Token::Info(message) => {
                self.errors.push(ServerMessage {
                    class: message.class.min(ServerMessage::INFO_MAX_CLASS),
                    ..message
                });
                None
            }
            Token::EnvChange(change) => {
                self.link.apply_env_change(change);
                None
            }
            other => Some(other),
        }
    }

    fn take_errors(&mut self) -> Option<OdbcError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(OdbcError::Backend(std::mem::take(&mut self.errors)))
        }
    }

    fn finish(&mut self, status: DoneStatus) -> Result<DoneStatus> {
        match self.take_errors() {
            Some(error) => Err(error),
            None if status.error => Err(OdbcError::General(
                "the backend reported a failure without a message".to_string(),
            )),
            None => Ok(status),
        }
    }

    /// Advance to the next row set or row count
    pub(crate) fn next_result(&mut self, diagnostics: &mut Diagnostics) -> Result<Outcome> {
        while let Some(token) = self.next_token()? {
            let Some(token) = self.side_channel(token, diagnostics) else {
                continue;
            };
            match token {
                Token::ColMetadata(defs) => {
                    let columns = defs
                        .iter()
                        .zip(1u16..)
                        .map(|(def, ordinal)| ColumnDesc::from_def(ordinal, def))
                        .collect();
                    return Ok(Outcome::Rows(columns));
                }
                Token::Done(status) => {
                    let status = self.finish(status)?;
                    return Ok(Outcome::Count(status.row_count));
                }
                Token::Row(_) => {
                    return Err(OdbcError::Wire(crate::wire::WireError::Malformed(
                        "row without column metadata".to_string(),
                    )));
                }
                Token::ParamMetadata(_) => {}
                Token::Error(_) | Token::Info(_) | Token::EnvChange(_) => {}
            }
        }
        match self.take_errors() {
            Some(error) => Err(error),
            None => Ok(Outcome::Exhausted),
        }
    }

    /// Next row of the current row set, decoded against `columns`
    pub(crate) fn next_row(
        &mut self,
        columns: &[ColumnDesc],
        diagnostics: &mut Diagnostics,
    ) -> Result<RowEvent> {
        while let Some(token) = self.next_token()? {
            let Some(token) = self.side_channel(token, diagnostics) else {
                continue;
            };
            match token {
                Token::Row(raw) => {
                    if raw.len() != columns.len() {
                        return Err(OdbcError::Wire(crate::wire::WireError::Malformed(format!(
                            "row has {} values for {} columns",
                            raw.len(),
                            columns.len()
                        ))));
                    }
                    let values = raw
                        .iter()
                        .zip(columns)
                        .map(|(value, column)| marshal::decode(value, &column.wire_type))
                        .collect::<Result<Vec<_>>>()?;
                    return Ok(RowEvent::Row(values));
                }
                Token::Done(status) => return self.finish(status).map(RowEvent::End),
                other => {
                    return Err(OdbcError::Wire(crate::wire::WireError::Malformed(format!(
                        "unexpected {other:?} inside a row set"
                    ))));
                }
            }
        }
        match self.take_errors() {
            Some(error) => Err(error),
            None => Ok(RowEvent::End(DoneStatus::default())),
        }
    }

    /// Skip what is left of the current row set
    pub(crate) fn skip_rows(
        &mut self,
        columns: &[ColumnDesc],
        diagnostics: &mut Diagnostics,
    ) -> Result<DoneStatus> {
        loop {
            if let RowEvent::End(status) = self.next_row(columns, diagnostics)? {
                return Ok(status);
            }
        }
    }

    /// Read a prepare response to the end
    pub(crate) fn describe(&mut self, diagnostics: &mut Diagnostics) -> Result<Description> {
        let mut description = Description::default();
        while let Some(token) = self.next_token()? {
            let Some(token) = self.side_channel(token, diagnostics) else {
                continue;
            };
            match token {
                Token::ParamMetadata(params) => description.params = Some(params),
                Token::ColMetadata(defs) => {
                    description.columns = defs
                        .iter()
                        .zip(1u16..)
                        .map(|(def, ordinal)| ColumnDesc::from_def(ordinal, def))
                        .collect();
                }
                Token::Done(status) => {
                    self.finish(status)?;
                }
                _ => {}
            }
        }
        match self.take_errors() {
            Some(error) => Err(error),
            None => Ok(description),
        }
    }
}
