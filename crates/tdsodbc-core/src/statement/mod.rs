//! Statement execution engine: prepare, bind, execute, need-data, fetch

mod deferred;
mod results;

pub use deferred::NeedData;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;

use crate::attr::{AttrValue, StatementOptions, StmtAttr, CONCUR_READ_ONLY, CURSOR_FORWARD_ONLY};
use crate::connection::WireLink;
use crate::descriptor::{
    describe_wire_type, wire_type_for, BoundBuffer, ColumnAttribute, ColumnDesc, ColumnField,
    DeferredToken, ParamDescription, ParamSource, ParameterDescriptor,
};
use crate::diagnostics::{DiagRecord, Diagnostics};
use crate::error::{OdbcError, Result};
use crate::marshal;
use crate::session::ResponseStream;
use crate::sqltext;
use crate::types::{CType, Indicator, Nullability, SqlType};
use crate::value::Value;
use crate::wire::{ColumnDef, DoneStatus, Request, Token, TokenReader, WireParam, WireValue};

use deferred::{Advance, DeferredExecution};
use results::{Outcome, Response, RowEvent};

/// Externally visible lifecycle state of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementState {
    /// No statement text
    Allocated,
    /// Text is known and may be executed; also the state after a cursor is closed
    Prepared,
    /// Execution is suspended until deferred parameter data is supplied
    NeedData,
    /// A row set is open and nothing has been fetched yet
    ResultsAvailable,
    /// A row set is open and the cursor has moved
    Fetching,
    /// The last result was a row count rather than a row set
    RowCount,
}

/// Position of the row cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    BeforeFirst,
    OnRow(u64),
    AfterLast,
}

/// Suspension point reached by `execute` or `param_data`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Done,
    NeedData(NeedData),
}

#[derive(Debug)]
struct ColumnBinding {
    c_type: CType,
    buffer: BoundBuffer,
}

#[derive(Debug)]
struct ResultSet {
    response: Response,
    columns: Vec<ColumnDesc>,
    cursor: Cursor,
    row: Vec<Value>,
    /// Column being read by `get_data` and where to resume; `None` once delivered
    progress: Option<(u16, Option<usize>)>,
    row_count: Option<u64>,
}

impl ResultSet {
    fn new(response: Response, columns: Vec<ColumnDesc>) -> Self {
        Self {
            response,
            columns,
            cursor: Cursor::BeforeFirst,
            row: Vec::new(),
            progress: None,
            row_count: None,
        }
    }
}

#[derive(Debug)]
enum State {
    Allocated,
    Prepared,
    NeedData(DeferredExecution),
    Results(ResultSet),
    RowCount {
        response: Response,
        count: Option<u64>,
    },
}

/// One statement handle's engine
#[derive(Debug)]
pub(crate) struct Statement {
    link: Arc<WireLink>,
    cancel: Arc<AtomicBool>,
    query: Option<String>,
    /// Parameter shapes reported by the backend at prepare time
    described: Option<Vec<ParamDescription>>,
    prepared_columns: Vec<ColumnDesc>,
    params: BTreeMap<u16, ParameterDescriptor>,
    bindings: BTreeMap<u16, ColumnBinding>,
    options: StatementOptions,
    state: State,
}

impl Statement {
    pub(crate) fn new(link: Arc<WireLink>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            link,
            cancel,
            query: None,
            described: None,
            prepared_columns: Vec::new(),
            params: BTreeMap::new(),
            bindings: BTreeMap::new(),
            options: StatementOptions::default(),
            state: State::Allocated,
        }
    }

    pub(crate) fn state(&self) -> StatementState {
        match &self.state {
            State::Allocated => StatementState::Allocated,
            State::Prepared => StatementState::Prepared,
            State::NeedData(_) => StatementState::NeedData,
            State::Results(set) if set.cursor == Cursor::BeforeFirst => {
                StatementState::ResultsAvailable
            }
            State::Results(_) => StatementState::Fetching,
            State::RowCount { .. } => StatementState::RowCount,
        }
    }

    fn idle(&self) -> State {
        if self.query.is_some() {
            State::Prepared
        } else {
            State::Allocated
        }
    }

    fn reject_while_pending(&self) -> Result<()> {
        if matches!(self.state, State::NeedData(_)) {
            return Err(OdbcError::Sequence(
                "deferred parameter data is still pending".to_string(),
            ));
        }
        Ok(())
    }

    fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::AcqRel)
    }

    /// Forget a cancel that arrived after the finished operation last looked.
    /// A statement waiting for deferred data keeps it for its next call.
    pub(crate) fn discard_late_cancel(&self) {
        if !matches!(self.state, State::NeedData(_)) {
            self.cancel.store(false, Ordering::Release);
        }
    }

    /// Cancel a statement suspended in need-data; `false` if it was not
    pub(crate) fn cancel_pending(&mut self) -> bool {
        if matches!(self.state, State::NeedData(_)) {
            tracing::warn!("deferred execution canceled");
            self.cancel.store(false, Ordering::Release);
            self.state = self.idle();
            return true;
        }
        false
    }

    /// Statement text as sent to the backend
    fn translate(&self, text: &str) -> Result<String> {
        if self.options.no_scan {
            Ok(text.to_string())
        } else {
            sqltext::native_sql(text)
        }
    }

    fn param_count(&self) -> usize {
        match (&self.described, &self.query) {
            (Some(described), _) => described.len(),
            (None, Some(query)) => sqltext::placeholders(query).len(),
            (None, None) => 0,
        }
    }

    #[tracing::instrument(skip(self, text, diagnostics), fields(sql_preview = %text.chars().take(100).collect::<String>()))]
    pub(crate) fn prepare(&mut self, text: &str, diagnostics: &mut Diagnostics) -> Result<()> {
        self.link.ensure_alive()?;
        self.reject_while_pending()?;
        let text = self.translate(text)?;
        self.state = State::Allocated;
        self.query = None;
        self.described = None;
        self.prepared_columns.clear();

        let request = Request::Prepare { text: text.clone() };
        let mut response = Response::new(self.link.exchange(&request)?, Arc::clone(&self.link));
        let description = response.describe(diagnostics)?;
        self.described = description.params.map(|defs| {
            defs.iter()
                .map(|def| {
                    let (sql_type, column_size, decimal_digits) = describe_wire_type(&def.ty);
                    ParamDescription {
                        sql_type,
                        column_size,
                        decimal_digits,
                        nullable: if def.nullable {
                            Nullability::Nullable
                        } else {
                            Nullability::NoNulls
                        },
                    }
                })
                .collect()
        });
        self.prepared_columns = description.columns;
        self.query = Some(text);
        self.state = State::Prepared;
        tracing::debug!(params = self.param_count(), "statement prepared");
        Ok(())
    }

    #[tracing::instrument(skip(self, text, diagnostics), fields(sql_preview = %text.chars().take(100).collect::<String>()))]
    pub(crate) fn exec_direct(&mut self, text: &str, diagnostics: &mut Diagnostics) -> Result<Step> {
        self.link.ensure_alive()?;
        self.reject_while_pending()?;
        self.query = Some(self.translate(text)?);
        self.described = None;
        self.prepared_columns.clear();
        self.state = State::Prepared;
        self.execute(diagnostics)
    }

    #[tracing::instrument(skip(self, diagnostics), fields(params = self.params.len()))]
    pub(crate) fn execute(&mut self, diagnostics: &mut Diagnostics) -> Result<Step> {
        self.link.ensure_alive()?;
        self.reject_while_pending()?;
        if self.query.is_none() {
            return Err(OdbcError::Sequence("no statement has been prepared".to_string()));
        }
        self.state = State::Prepared;

        let count = self.param_count();
        for ordinal in 1..=count {
            let ordinal = ordinal as u16;
            if !self.params.contains_key(&ordinal) {
                return Err(OdbcError::ParameterNotBound(ordinal));
            }
        }
        let in_use = self.params.range(1..=count as u16).map(|(_, param)| param);
        match DeferredExecution::plan(in_use)? {
            Some(pending) => {
                let need = pending
                    .current()
                    .ok_or_else(|| OdbcError::General("empty deferred plan".to_string()))?;
                tracing::debug!(token = need.token.0, ordinal = need.ordinal, "awaiting deferred data");
                self.state = State::NeedData(pending);
                Ok(Step::NeedData(need))
            }
            None => self.run(BTreeMap::new(), diagnostics).map(|()| Step::Done),
        }
    }

    fn pending(&mut self) -> Result<&mut DeferredExecution> {
        if let State::NeedData(_) = self.state {
            if self.take_cancel() {
                self.state = self.idle();
                return Err(OdbcError::Cancelled);
            }
        }
        match &mut self.state {
            State::NeedData(pending) => Ok(pending),
            _ => Err(OdbcError::Sequence(
                "no deferred parameter is awaiting data".to_string(),
            )),
        }
    }

    pub(crate) fn put_data(&mut self, token: DeferredToken, chunk: &[u8]) -> Result<()> {
        self.link.ensure_alive()?;
        self.pending()?.put_data(token, chunk)
    }

    pub(crate) fn put_null(&mut self, token: DeferredToken) -> Result<()> {
        self.link.ensure_alive()?;
        self.pending()?.put_null(token)
    }

    pub(crate) fn param_data(&mut self, diagnostics: &mut Diagnostics) -> Result<Step> {
        self.link.ensure_alive()?;
        match self.pending()?.param_data()? {
            Advance::Pending(need) => {
                tracing::debug!(token = need.token.0, ordinal = need.ordinal, "awaiting deferred data");
                Ok(Step::NeedData(need))
            }
            Advance::Complete(data) => {
                self.state = State::Prepared;
                self.run(data, diagnostics).map(|()| Step::Done)
            }
        }
    }

    /// Send the request and open its first result. Failures leave the
    /// statement prepared.
    fn run(
        &mut self,
        deferred: BTreeMap<u16, Option<Vec<u8>>>,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let result = self.send(deferred, diagnostics);
        if let Err(error) = &result {
            if matches!(error, OdbcError::Cancelled) {
                tracing::warn!("execution canceled");
            }
            self.state = self.idle();
        }
        result
    }

    fn send(
        &mut self,
        deferred: BTreeMap<u16, Option<Vec<u8>>>,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let text = self
            .query
            .clone()
            .ok_or_else(|| OdbcError::Sequence("no statement has been prepared".to_string()))?;
        let count = self.param_count() as u16;
        let mut params = Vec::with_capacity(count as usize);
        for ordinal in 1..=count {
            let param = self
                .params
                .get(&ordinal)
                .ok_or(OdbcError::ParameterNotBound(ordinal))?;
            let (wire, fraction_dropped) = wire_param(param, &deferred)?;
            if fraction_dropped {
                diagnostics.push(DiagRecord::fraction_truncated());
            }
            params.push(wire);
        }

        if self.take_cancel() {
            return Err(OdbcError::Cancelled);
        }
        let request = if params.is_empty() {
            Request::Batch { text }
        } else {
            Request::Execute { text, params }
        };
        let mut response = Response::new(self.link.exchange(&request)?, Arc::clone(&self.link));
        let outcome = response.next_result(diagnostics)?;
        if self.take_cancel() {
            return Err(OdbcError::Cancelled);
        }
        self.state = match outcome {
            Outcome::Rows(columns) => {
                tracing::debug!(columns = columns.len(), "result set available");
                State::Results(ResultSet::new(response, columns))
            }
            Outcome::Count(count) => State::RowCount { response, count },
            Outcome::Exhausted => State::RowCount {
                response,
                count: None,
            },
        };
        Ok(())
    }

    pub(crate) fn bind_parameter(&mut self, param: ParameterDescriptor) -> Result<()> {
        if param.ordinal == 0 {
            return Err(OdbcError::InvalidDescriptorIndex(0));
        }
        self.reject_while_pending()?;
        self.params.insert(param.ordinal, param);
        Ok(())
    }

    pub(crate) fn reset_params(&mut self) -> Result<()> {
        self.reject_while_pending()?;
        self.params.clear();
        Ok(())
    }

    pub(crate) fn num_params(&self) -> Result<u16> {
        if self.query.is_none() {
            return Err(OdbcError::Sequence("no statement has been prepared".to_string()));
        }
        Ok(self.param_count() as u16)
    }

    pub(crate) fn describe_param(&self, ordinal: u16) -> Result<ParamDescription> {
        let count = self.num_params()?;
        if ordinal == 0 || ordinal > count {
            return Err(OdbcError::InvalidDescriptorIndex(ordinal));
        }
        if let Some(described) = &self.described {
            if let Some(description) = described.get(ordinal as usize - 1) {
                return Ok(description.clone());
            }
        }
        Ok(match self.params.get(&ordinal) {
            Some(param) => ParamDescription {
                sql_type: param.sql_type,
                column_size: param.column_size,
                decimal_digits: param.decimal_digits,
                nullable: Nullability::Unknown,
            },
            None => ParamDescription {
                sql_type: SqlType::WVarChar,
                column_size: 0,
                decimal_digits: 0,
                nullable: Nullability::Unknown,
            },
        })
    }

    fn columns(&self) -> Result<&[ColumnDesc]> {
        match &self.state {
            State::Results(set) => Ok(&set.columns),
            State::Prepared => Ok(&self.prepared_columns),
            State::Allocated | State::RowCount { .. } => Ok(&[]),
            State::NeedData(_) => Err(OdbcError::Sequence(
                "deferred parameter data is still pending".to_string(),
            )),
        }
    }

    pub(crate) fn num_result_cols(&self) -> Result<u16> {
        Ok(self.columns()?.len() as u16)
    }

    pub(crate) fn describe_col(&self, ordinal: u16) -> Result<ColumnDesc> {
        let columns = self.columns()?;
        ordinal
            .checked_sub(1)
            .and_then(|index| columns.get(index as usize))
            .cloned()
            .ok_or(OdbcError::InvalidDescriptorIndex(ordinal))
    }

    pub(crate) fn bind_col(&mut self, ordinal: u16, c_type: CType, buffer: BoundBuffer) -> Result<()> {
        if ordinal == 0 {
            return Err(OdbcError::InvalidDescriptorIndex(0));
        }
        self.bindings.insert(ordinal, ColumnBinding { c_type, buffer });
        Ok(())
    }

    pub(crate) fn unbind_cols(&mut self) {
        self.bindings.clear();
    }

    /// Drop the open result set if a cancel has been requested
    fn abandon_if_canceled(&mut self) -> Result<()> {
        if self.take_cancel() {
            tracing::warn!("fetch canceled");
            self.state = self.idle();
            return Err(OdbcError::Cancelled);
        }
        Ok(())
    }

    /// Advance the cursor; `false` once the row set is exhausted
    pub(crate) fn fetch(&mut self, diagnostics: &mut Diagnostics) -> Result<bool> {
        self.link.ensure_alive()?;
        self.reject_while_pending()?;
        if matches!(self.state, State::Results(_)) {
            self.abandon_if_canceled()?;
        }
        let State::Results(set) = &mut self.state else {
            return Err(OdbcError::InvalidCursorState("no open result set".to_string()));
        };
        if set.cursor == Cursor::AfterLast {
            return Ok(false);
        }
        let limit = self.options.max_rows;
        if limit > 0 && matches!(set.cursor, Cursor::OnRow(n) if n >= limit) {
            tracing::debug!(max_rows = limit, "row limit reached");
            return match set.response.skip_rows(&set.columns, diagnostics) {
                Ok(status) => {
                    end_row_set(set, status);
                    Ok(false)
                }
                Err(error) => {
                    end_row_set(set, DoneStatus::default());
                    Err(error)
                }
            };
        }
        let event = set.response.next_row(&set.columns, diagnostics);
        self.abandon_if_canceled()?;
        let State::Results(set) = &mut self.state else {
            return Err(OdbcError::InvalidCursorState("no open result set".to_string()));
        };
        match event {
            Ok(RowEvent::Row(values)) => {
                let position = match set.cursor {
                    Cursor::OnRow(n) => n + 1,
                    _ => 1,
                };
                set.cursor = Cursor::OnRow(position);
                set.row = values;
                set.progress = None;
                fill_bindings(&self.bindings, set, diagnostics)?;
                Ok(true)
            }
            Ok(RowEvent::End(status)) => {
                end_row_set(set, status);
                Ok(false)
            }
            Err(error) => {
                end_row_set(set, DoneStatus::default());
                Err(error)
            }
        }
    }

    /// Answer a column attribute; `ColumnField::Count` ignores `ordinal`
    pub(crate) fn col_attribute(&self, ordinal: u16, field: ColumnField) -> Result<ColumnAttribute> {
        if field == ColumnField::Count {
            return Ok(ColumnAttribute::Integer(i64::from(self.num_result_cols()?)));
        }
        if matches!(self.state, State::Allocated) {
            return Err(OdbcError::Sequence("no statement has been prepared".to_string()));
        }
        Ok(self.describe_col(ordinal)?.attribute(field))
    }

    pub(crate) fn attr(&self, attr: StmtAttr) -> AttrValue {
        match attr {
            StmtAttr::QueryTimeout => AttrValue::UInt(self.options.query_timeout_secs),
            StmtAttr::MaxRows => AttrValue::UInt(self.options.max_rows),
            StmtAttr::RowArraySize => AttrValue::UInt(1),
            StmtAttr::CursorType => AttrValue::UInt(CURSOR_FORWARD_ONLY),
            StmtAttr::Concurrency => AttrValue::UInt(CONCUR_READ_ONLY),
            StmtAttr::NoScan => AttrValue::Bool(self.options.no_scan),
            StmtAttr::RowNumber => AttrValue::UInt(match &self.state {
                State::Results(ResultSet {
                    cursor: Cursor::OnRow(n),
                    ..
                }) => *n,
                _ => 0,
            }),
        }
    }

    /// Values the statement cannot honor are replaced by the supported one
    /// with an option-value-changed warning
    pub(crate) fn set_attr(
        &mut self,
        attr: StmtAttr,
        value: &AttrValue,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let fixed = |wanted: u64, supported: u64, diagnostics: &mut Diagnostics| {
            if wanted != supported {
                diagnostics.push(DiagRecord::option_changed(&format!(
                    "{attr:?} {wanted} replaced by {supported}"
                )));
            }
        };
        match attr {
            StmtAttr::QueryTimeout => self.options.query_timeout_secs = value.as_uint(attr)?,
            StmtAttr::MaxRows => self.options.max_rows = value.as_uint(attr)?,
            StmtAttr::NoScan => self.options.no_scan = value.as_bool(attr)?,
            StmtAttr::RowArraySize => fixed(value.as_uint(attr)?, 1, diagnostics),
            StmtAttr::CursorType => fixed(value.as_uint(attr)?, CURSOR_FORWARD_ONLY, diagnostics),
            StmtAttr::Concurrency => fixed(value.as_uint(attr)?, CONCUR_READ_ONLY, diagnostics),
            StmtAttr::RowNumber => {
                return Err(OdbcError::InvalidAttribute(format!("{attr:?} is read-only")));
            }
        }
        Ok(())
    }

    /// Read (part of) one column of the current row.
    ///
    /// Returns `None` when the column has already been fully delivered.
    pub(crate) fn get_data(
        &mut self,
        ordinal: u16,
        target: CType,
        buf: &mut [u8],
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<Indicator>> {
        self.link.ensure_alive()?;
        self.reject_while_pending()?;
        let State::Results(set) = &mut self.state else {
            return Err(OdbcError::InvalidCursorState("no open result set".to_string()));
        };
        if !matches!(set.cursor, Cursor::OnRow(_)) {
            return Err(OdbcError::InvalidCursorState("the cursor is not on a row".to_string()));
        }
        let index = ordinal
            .checked_sub(1)
            .map(usize::from)
            .filter(|index| *index < set.columns.len())
            .ok_or(OdbcError::InvalidDescriptorIndex(ordinal))?;
        let offset = match set.progress {
            Some((column, Some(offset))) if column == ordinal => offset,
            Some((column, None)) if column == ordinal => return Ok(None),
            _ => 0,
        };
        let target = marshal::resolve_c_type(target, set.columns[index].sql_type);
        let encoded = marshal::encode(&set.row[index], target, buf, offset)?;
        set.progress = Some((ordinal, encoded.next_offset));
        if encoded.truncated {
            diagnostics.push(DiagRecord::truncated());
        }
        if encoded.fraction_dropped {
            diagnostics.push(DiagRecord::fraction_truncated());
        }
        Ok(Some(encoded.indicator))
    }

    /// Affected rows of the last statement; -1 when unknown
    pub(crate) fn row_count(&self) -> Result<i64> {
        let count = match &self.state {
            State::RowCount { count, .. } => *count,
            State::Results(set) => set.row_count,
            _ => {
                return Err(OdbcError::Sequence(
                    "the statement has not been executed".to_string(),
                ));
            }
        };
        Ok(count.and_then(|c| i64::try_from(c).ok()).unwrap_or(-1))
    }

    /// Move to the next result of the response; `false` when none is left
    pub(crate) fn more_results(&mut self, diagnostics: &mut Diagnostics) -> Result<bool> {
        self.link.ensure_alive()?;
        self.reject_while_pending()?;
        let idle = self.idle();
        let mut response = match std::mem::replace(&mut self.state, idle) {
            State::Results(mut set) => {
                if set.cursor != Cursor::AfterLast {
                    set.response.skip_rows(&set.columns, diagnostics)?;
                }
                set.response
            }
            State::RowCount { response, .. } => response,
            other => {
                self.state = other;
                return Ok(false);
            }
        };
        let outcome = response.next_result(diagnostics)?;
        if self.take_cancel() {
            tracing::warn!("result processing canceled");
            return Err(OdbcError::Cancelled);
        }
        match outcome {
            Outcome::Rows(columns) => {
                self.state = State::Results(ResultSet::new(response, columns));
                Ok(true)
            }
            Outcome::Count(count) => {
                self.state = State::RowCount { response, count };
                Ok(true)
            }
            Outcome::Exhausted => Ok(false),
        }
    }

    /// Discard results and pending data; the statement text is kept
    pub(crate) fn close_cursor(&mut self) {
        if !matches!(self.state, State::Allocated | State::Prepared) {
            tracing::debug!("cursor closed");
        }
        self.state = self.idle();
    }

    /// Execute driver-generated text with its own text arguments; the
    /// caller's parameter bindings are left in place
    pub(crate) fn exec_internal(
        &mut self,
        text: &str,
        args: &[String],
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        self.reject_while_pending()?;
        let caller = std::mem::take(&mut self.params);
        for (ordinal, arg) in (1u16..).zip(args) {
            let param =
                ParameterDescriptor::bound(ordinal, CType::Char, SqlType::WVarChar, BoundBuffer::text(arg))
                    .with_size(128, 0);
            self.params.insert(ordinal, param);
        }
        let result = self.exec_direct(text, diagnostics);
        self.params = caller;
        match result? {
            Step::Done => Ok(()),
            Step::NeedData(_) => Err(OdbcError::General(
                "catalog query asked for deferred data".to_string(),
            )),
        }
    }

    /// Open a row set built in the driver rather than read from the backend
    pub(crate) fn load_rows(
        &mut self,
        columns: Vec<ColumnDef>,
        rows: Vec<Vec<WireValue>>,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        self.reject_while_pending()?;
        let row_count = rows.len() as u64;
        let mut buf = BytesMut::new();
        Token::ColMetadata(columns).encode(&mut buf);
        for row in rows {
            Token::Row(row).encode(&mut buf);
        }
        Token::Done(DoneStatus {
            row_count: Some(row_count),
            ..DoneStatus::default()
        })
        .encode(&mut buf);
        let reader = TokenReader::new(ResponseStream::from_packets([buf.freeze()]));
        let mut response = Response::new(reader, Arc::clone(&self.link));
        self.state = match response.next_result(diagnostics)? {
            Outcome::Rows(columns) => State::Results(ResultSet::new(response, columns)),
            _ => self.idle(),
        };
        Ok(())
    }
}

fn end_row_set(set: &mut ResultSet, status: DoneStatus) {
    set.cursor = Cursor::AfterLast;
    set.row.clear();
    set.progress = None;
    set.row_count = status.row_count;
}

fn fill_bindings(
    bindings: &BTreeMap<u16, ColumnBinding>,
    set: &ResultSet,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let mut truncated = false;
    let mut fraction_dropped = false;
    let mut first_error = None;
    for (ordinal, binding) in bindings {
        let index = usize::from(*ordinal) - 1;
        let (Some(column), Some(value)) = (set.columns.get(index), set.row.get(index)) else {
            continue;
        };
        let target = marshal::resolve_c_type(binding.c_type, column.sql_type);
        let filled = binding.buffer.fill(|buf| {
            let encoded = marshal::encode(value, target, buf, 0)?;
            truncated |= encoded.truncated;
            fraction_dropped |= encoded.fraction_dropped;
            Ok::<_, OdbcError>(encoded.indicator)
        });
        if let Err(error) = filled {
            first_error.get_or_insert(error);
        }
    }
    if truncated {
        diagnostics.push(DiagRecord::truncated());
    }
    if fraction_dropped {
        diagnostics.push(DiagRecord::fraction_truncated());
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Parameter value read from its buffer or deferred chunks, in wire form,
/// and whether an integer column lost its fraction
fn wire_param(
    param: &ParameterDescriptor,
    deferred: &BTreeMap<u16, Option<Vec<u8>>>,
) -> Result<(WireParam, bool)> {
    let c_type = marshal::resolve_c_type(param.c_type, param.sql_type);
    let bytes = match &param.source {
        ParamSource::Bound(buffer) => buffer.value_units(if c_type == CType::WChar { 2 } else { 1 }),
        ParamSource::Deferred(_) => deferred.get(&param.ordinal).cloned().flatten(),
    };
    let value = marshal::read_parameter(c_type, bytes.as_deref())?;
    let ty = wire_type_for(param.sql_type, param.column_size, param.decimal_digits);
    let param = WireParam {
        ty,
        value: marshal::to_wire(&value, &ty)?,
    };
    Ok((param, marshal::drops_fraction(&value, &ty)))
}

#[cfg(test)]
#[path = "statement_tests.rs"]
mod tests;
