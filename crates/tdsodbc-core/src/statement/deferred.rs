//! Deferred-parameter coordinator: collects data supplied after execute

use std::collections::{BTreeMap, HashSet};

use crate::descriptor::{DeferredToken, ParameterDescriptor};
use crate::error::{OdbcError, Result};

/// Continuation handed back while an execution waits for deferred data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NeedData {
    /// Token the caller chose when binding the parameter
    pub token: DeferredToken,
    /// 1-based parameter ordinal
    pub ordinal: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Supplied {
    Nothing,
    Null,
    Chunks(Vec<u8>),
}

/// Where the caller is in the need-data exchange
#[derive(Debug)]
pub(crate) struct DeferredExecution {
    pending: Vec<NeedData>,
    position: usize,
    /// `param_data` has reported the current token
    announced: bool,
    current: Supplied,
    received: BTreeMap<u16, Option<Vec<u8>>>,
}

/// What `param_data` decided
#[derive(Debug)]
pub(crate) enum Advance {
    /// The caller must supply data for this parameter next
    Pending(NeedData),
    /// Every deferred parameter has its data
    Complete(BTreeMap<u16, Option<Vec<u8>>>),
}

impl DeferredExecution {
    /// Deferred parameters in ordinal order; `None` when nothing is deferred.
    ///
    /// Fails when two parameters share a token.
    pub(crate) fn plan<'a>(
        params: impl IntoIterator<Item = &'a ParameterDescriptor>,
    ) -> Result<Option<Self>> {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for param in params {
            if let Some(token) = param.token() {
                if !seen.insert(token) {
                    return Err(OdbcError::General(format!(
                        "deferred token {} is used by more than one parameter",
                        token.0
                    )));
                }
                pending.push(NeedData {
                    token,
                    ordinal: param.ordinal,
                });
            }
        }
        pending.sort_by_key(|need| need.ordinal);
        if pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            pending,
            position: 0,
            announced: false,
            current: Supplied::Nothing,
            received: BTreeMap::new(),
        }))
    }

    pub(crate) fn current(&self) -> Option<NeedData> {
        self.pending.get(self.position).copied()
    }

    fn expect(&self, token: DeferredToken) -> Result<NeedData> {
        match self.current() {
            Some(need) if need.token == token => Ok(need),
            Some(need) => Err(OdbcError::Sequence(format!(
                "data supplied for token {} while token {} is pending",
                token.0, need.token.0
            ))),
            None => Err(OdbcError::Sequence(format!(
                "no deferred parameter is pending for token {}",
                token.0
            ))),
        }
    }

    /// Append one chunk; an empty chunk still counts as data
    pub(crate) fn put_data(&mut self, token: DeferredToken, chunk: &[u8]) -> Result<()> {
        self.expect(token)?;
        match &mut self.current {
            Supplied::Null => {
                return Err(OdbcError::Sequence(format!(
                    "token {} was already supplied as NULL",
                    token.0
                )));
            }
            Supplied::Chunks(data) => data.extend_from_slice(chunk),
            Supplied::Nothing => self.current = Supplied::Chunks(chunk.to_vec()),
        }
        Ok(())
    }

    pub(crate) fn put_null(&mut self, token: DeferredToken) -> Result<()> {
        self.expect(token)?;
        if self.current != Supplied::Nothing {
            return Err(OdbcError::Sequence(format!(
                "token {} already has data",
                token.0
            )));
        }
        self.current = Supplied::Null;
        Ok(())
    }

    /// Move past the current parameter once it has data.
    ///
    /// A parameter that has not yet been reported is reported instead of
    /// skipped, so callers that ask for the token before supplying data work.
    pub(crate) fn param_data(&mut self) -> Result<Advance> {
        let Some(need) = self.current() else {
            return Err(OdbcError::Sequence("no deferred parameter is pending".to_string()));
        };
        match std::mem::replace(&mut self.current, Supplied::Nothing) {
            Supplied::Nothing if !self.announced => {
                self.announced = true;
                Ok(Advance::Pending(need))
            }
            Supplied::Nothing => Err(OdbcError::Sequence(format!(
                "no data was supplied for token {}",
                need.token.0
            ))),
            supplied => {
                let data = match supplied {
                    Supplied::Chunks(data) => Some(data),
                    _ => None,
                };
                self.received.insert(need.ordinal, data);
                self.position += 1;
                self.announced = true;
                match self.current() {
                    Some(next) => Ok(Advance::Pending(next)),
                    None => Ok(Advance::Complete(std::mem::take(&mut self.received))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CType, SqlType};

    fn deferred(ordinal: u16, token: u64) -> ParameterDescriptor {
        ParameterDescriptor::deferred(ordinal, CType::Char, SqlType::VarChar, DeferredToken(token))
    }

    fn plan(params: &[ParameterDescriptor]) -> DeferredExecution {
        DeferredExecution::plan(params).unwrap().unwrap()
    }

    #[test]
    fn test_tokens_are_served_in_ordinal_order() {
        let mut exec = plan(&[deferred(3, 30), deferred(1, 10)]);
        assert_eq!(exec.current().map(|n| n.ordinal), Some(1));
        exec.put_data(DeferredToken(10), b"a").unwrap();
        let Advance::Pending(next) = exec.param_data().unwrap() else {
            panic!("expected another need-data cycle");
        };
        assert_eq!(next.token, DeferredToken(30));
        exec.put_data(DeferredToken(30), b"b").unwrap();
        exec.put_data(DeferredToken(30), b"c").unwrap();
        let Advance::Complete(data) = exec.param_data().unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(data.get(&3), Some(&Some(b"bc".to_vec())));
    }

    #[test]
    fn test_out_of_order_and_repeated_tokens_are_rejected() {
        let mut exec = plan(&[deferred(1, 10), deferred(2, 20)]);
        assert!(matches!(exec.put_data(DeferredToken(20), b"x"), Err(OdbcError::Sequence(_))));
        exec.put_data(DeferredToken(10), b"x").unwrap();
        exec.param_data().unwrap();
        assert!(matches!(exec.put_data(DeferredToken(10), b"y"), Err(OdbcError::Sequence(_))));
    }

    #[test]
    fn test_empty_chunk_differs_from_no_data() {
        let mut exec = plan(&[deferred(1, 10)]);
        exec.put_data(DeferredToken(10), b"").unwrap();
        let Advance::Complete(data) = exec.param_data().unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(data.get(&1), Some(&Some(Vec::new())));

        let mut exec = plan(&[deferred(1, 10)]);
        // first call reports the token, the second has nothing to advance past
        assert!(matches!(exec.param_data(), Ok(Advance::Pending(_))));
        assert!(matches!(exec.param_data(), Err(OdbcError::Sequence(_))));
    }

    #[test]
    fn test_null_then_data_is_rejected() {
        let mut exec = plan(&[deferred(1, 10)]);
        exec.put_null(DeferredToken(10)).unwrap();
        assert!(exec.put_data(DeferredToken(10), b"x").is_err());
        let Advance::Complete(data) = exec.param_data().unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(data.get(&1), Some(&None));
    }

    #[test]
    fn test_duplicate_tokens_fail_planning() {
        let err = DeferredExecution::plan(&[deferred(1, 7), deferred(2, 7)]).unwrap_err();
        assert_eq!(err.sql_state().as_str(), "HY000");
        assert!(DeferredExecution::plan(&Vec::new()).unwrap().is_none());
    }
}
