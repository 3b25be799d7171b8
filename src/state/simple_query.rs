//! Simple query protocol state machine.
//!
//! Drives a single `Query` message through to its final `ReadyForQuery`,
//! accumulating every result set the server returns (a simple query string
//! may contain several statements separated by `;`).

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    ColumnMeta, CommandComplete, DataRow, EmptyQueryResponse, ErrorResponse, RawMessage,
    ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, AsyncMessage};

/// A single result set produced by one statement within a simple query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column metadata, empty for statements with no result set (e.g. INSERT).
    pub columns: Vec<ColumnMeta>,
    /// Row values, `None` per-value for SQL NULL.
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    /// Command tag from `CommandComplete`, e.g. `"SELECT 5"`.
    pub tag: Option<String>,
}

/// Simple query state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponseRead,
    WaitingResponse,
    WaitingReady,
    Finished,
}

/// Simple query protocol state machine.
///
/// Drives one `Query` message (which may contain several `;`-separated
/// statements) and accumulates every result set returned.
pub struct SimpleQueryStateMachine {
    state: State,
    query: String,
    results: Vec<QueryResult>,
    current: QueryResult,
    transaction_status: TransactionStatus,
}

impl SimpleQueryStateMachine {
    /// Create a state machine for the given query string.
    ///
    /// Call [`StateMachine::step`] in a loop, performing the requested I/O,
    /// until it returns `Action::Finished`.
    pub fn new(query: String) -> Self {
        Self {
            state: State::Initial,
            query,
            results: Vec::new(),
            current: QueryResult::default(),
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Take the accumulated result sets once the query has finished.
    pub fn take_results(&mut self) -> Vec<QueryResult> {
        std::mem::take(&mut self.results)
    }

    fn handle_initial(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, &self.query);
        self.state = State::WaitingResponseRead;
        Ok(Action::Write)
    }

    fn finish_current(&mut self) {
        self.results.push(std::mem::take(&mut self.current));
    }

    fn handle_response(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        let payload = &buffer_set.read_buffer;

        match type_byte {
            msg_type::ROW_DESCRIPTION => {
                let cols = RowDescription::parse(payload)?;
                self.current.columns = cols.iter().map(ColumnMeta::from).collect();
                self.state = State::WaitingResponseRead;
                Ok(Action::ReadMessage)
            }
            msg_type::DATA_ROW => {
                let row = DataRow::parse(payload)?;
                let values: Vec<Option<Vec<u8>>> =
                    row.iter().map(|v| v.map(<[u8]>::to_vec)).collect();
                self.current.rows.push(values);
                self.state = State::WaitingResponseRead;
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.current.tag = Some(complete.tag.to_string());
                self.finish_current();
                self.state = State::WaitingResponseRead;
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                EmptyQueryResponse::parse(payload)?;
                self.finish_current();
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            _ => Err(Error::Protocol(format!(
                "Unexpected message in query response: '{}'",
                type_byte as char
            ))),
        }
    }

    fn handle_async_message(&self, msg: &RawMessage<'_>) -> Result<Action> {
        match msg.type_byte {
            msg_type::NOTICE_RESPONSE => {
                let notice = crate::protocol::backend::NoticeResponse::parse(msg.payload)?;
                Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::Notice(notice.fields),
                ))
            }
            msg_type::PARAMETER_STATUS => {
                let param = crate::protocol::backend::ParameterStatus::parse(msg.payload)?;
                Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::ParameterChanged {
                        name: param.name.to_string(),
                        value: param.value.to_string(),
                    },
                ))
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification =
                    crate::protocol::backend::auth::NotificationResponse::parse(msg.payload)?;
                Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::Notification {
                        pid: notification.pid,
                        channel: notification.channel.to_string(),
                        payload: notification.payload.to_string(),
                    },
                ))
            }
            _ => Err(Error::Protocol(format!(
                "Unknown async message type: '{}'",
                msg.type_byte as char
            ))),
        }
    }
}

impl StateMachine for SimpleQueryStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            return self.handle_initial(buffer_set);
        }

        if self.state == State::WaitingResponseRead {
            self.state = State::WaitingResponse;
            return Ok(Action::ReadMessage);
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = RawMessage::new(type_byte, &buffer_set.read_buffer);
            return self.handle_async_message(&msg);
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            // Still need to drain through to ReadyForQuery on the next query.
            self.state = State::WaitingReady;
            return Err(error.into_error());
        }

        match self.state {
            State::WaitingResponse | State::WaitingReady => self.handle_response(buffer_set),
            _ => Err(Error::Protocol(format!(
                "Unexpected state {:?}",
                self.state
            ))),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}
