// src/core/operations/transaction.rs

//! The three phases of a transactional write: start, write, commit.

use crate::core::OpaliteError;
use crate::core::operations::{Decision, Operation, OutOfBand, inspect_out_of_band, request_package};
use crate::core::protocol::messages::{
    self, NewEvent, OperationResult, TransactionCommit, TransactionCommitCompleted,
    TransactionStart, TransactionStartCompleted, TransactionWrite, TransactionWriteCompleted,
};
use crate::core::protocol::{Credentials, Package, TcpCommand};
use crate::core::types::{Position, WriteResult};
use tokio::sync::oneshot;
use uuid::Uuid;

pub struct StartTransactionOperation {
    result: Option<oneshot::Sender<Result<i64, OpaliteError>>>,
    require_master: bool,
    stream: String,
    expected_version: i64,
    credentials: Option<Credentials>,
}

impl StartTransactionOperation {
    pub fn new(
        result: oneshot::Sender<Result<i64, OpaliteError>>,
        require_master: bool,
        stream: String,
        expected_version: i64,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            require_master,
            stream,
            expected_version,
            credentials,
        }
    }
}

impl Operation for StartTransactionOperation {
    fn name(&self) -> &'static str {
        "StartTransaction"
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            TcpCommand::TransactionStart,
            correlation_id,
            &self.credentials,
            &TransactionStart {
                event_stream_id: self.stream.clone(),
                expected_version: self.expected_version,
                require_master: self.require_master,
            },
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != TcpCommand::TransactionStartCompleted {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: TransactionStartCompleted = match messages::decode(&package.payload) {
            Ok(completed) => completed,
            Err(e) => {
                self.fail(e);
                return Decision::EndOperation;
            }
        };

        match completed.result {
            OperationResult::Success => {
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(completed.transaction_id));
                }
                Decision::EndOperation
            }
            OperationResult::PrepareTimeout
            | OperationResult::CommitTimeout
            | OperationResult::ForwardTimeout => Decision::Retry,
            OperationResult::WrongExpectedVersion => {
                self.fail(OpaliteError::WrongExpectedVersion(format!(
                    "transaction on '{}' expected version {}",
                    self.stream, self.expected_version
                )));
                Decision::EndOperation
            }
            OperationResult::StreamDeleted => {
                self.fail(OpaliteError::StreamDeleted(self.stream.clone()));
                Decision::EndOperation
            }
            OperationResult::InvalidTransaction => {
                self.fail(OpaliteError::ServerError(completed.message));
                Decision::EndOperation
            }
            OperationResult::AccessDenied => {
                self.fail(OpaliteError::AccessDenied(format!(
                    "transaction on '{}'",
                    self.stream
                )));
                Decision::EndOperation
            }
        }
    }

    fn fail(&mut self, error: OpaliteError) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Err(error));
        }
    }
}

pub struct TransactionalWriteOperation {
    result: Option<oneshot::Sender<Result<(), OpaliteError>>>,
    require_master: bool,
    transaction_id: i64,
    events: Vec<NewEvent>,
    credentials: Option<Credentials>,
}

impl TransactionalWriteOperation {
    pub fn new(
        result: oneshot::Sender<Result<(), OpaliteError>>,
        require_master: bool,
        transaction_id: i64,
        events: Vec<NewEvent>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            require_master,
            transaction_id,
            events,
            credentials,
        }
    }
}

impl Operation for TransactionalWriteOperation {
    fn name(&self) -> &'static str {
        "TransactionalWrite"
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            TcpCommand::TransactionWrite,
            correlation_id,
            &self.credentials,
            &TransactionWrite {
                transaction_id: self.transaction_id,
                events: self.events.clone(),
                require_master: self.require_master,
            },
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != TcpCommand::TransactionWriteCompleted {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: TransactionWriteCompleted = match messages::decode(&package.payload) {
            Ok(completed) => completed,
            Err(e) => {
                self.fail(e);
                return Decision::EndOperation;
            }
        };

        match completed.result {
            OperationResult::Success => {
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(()));
                }
                Decision::EndOperation
            }
            OperationResult::PrepareTimeout
            | OperationResult::CommitTimeout
            | OperationResult::ForwardTimeout => Decision::Retry,
            OperationResult::AccessDenied => {
                self.fail(OpaliteError::AccessDenied(format!(
                    "transactional write in transaction {}",
                    self.transaction_id
                )));
                Decision::EndOperation
            }
            _ => {
                self.fail(OpaliteError::ServerError(completed.message));
                Decision::EndOperation
            }
        }
    }

    fn fail(&mut self, error: OpaliteError) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Err(error));
        }
    }
}

pub struct CommitTransactionOperation {
    result: Option<oneshot::Sender<Result<WriteResult, OpaliteError>>>,
    require_master: bool,
    transaction_id: i64,
    credentials: Option<Credentials>,
}

impl CommitTransactionOperation {
    pub fn new(
        result: oneshot::Sender<Result<WriteResult, OpaliteError>>,
        require_master: bool,
        transaction_id: i64,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            require_master,
            transaction_id,
            credentials,
        }
    }
}

impl Operation for CommitTransactionOperation {
    fn name(&self) -> &'static str {
        "CommitTransaction"
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            TcpCommand::TransactionCommit,
            correlation_id,
            &self.credentials,
            &TransactionCommit {
                transaction_id: self.transaction_id,
                require_master: self.require_master,
            },
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != TcpCommand::TransactionCommitCompleted {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: TransactionCommitCompleted = match messages::decode(&package.payload) {
            Ok(completed) => completed,
            Err(e) => {
                self.fail(e);
                return Decision::EndOperation;
            }
        };

        match completed.result {
            OperationResult::Success => {
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(WriteResult {
                        next_expected_version: completed.last_event_number,
                        log_position: Position::new(
                            completed.commit_position,
                            completed.prepare_position,
                        ),
                    }));
                }
                Decision::EndOperation
            }
            // A commit that timed out server-side must not be blindly re-sent;
            // the transaction may have been committed already.
            OperationResult::CommitTimeout => {
                self.fail(OpaliteError::CommitTimeout);
                Decision::EndOperation
            }
            OperationResult::PrepareTimeout | OperationResult::ForwardTimeout => Decision::Retry,
            OperationResult::WrongExpectedVersion => {
                self.fail(OpaliteError::WrongExpectedVersion(format!(
                    "commit of transaction {}",
                    self.transaction_id
                )));
                Decision::EndOperation
            }
            OperationResult::StreamDeleted => {
                self.fail(OpaliteError::StreamDeleted(format!(
                    "transaction {}",
                    self.transaction_id
                )));
                Decision::EndOperation
            }
            OperationResult::InvalidTransaction => {
                self.fail(OpaliteError::ServerError(completed.message));
                Decision::EndOperation
            }
            OperationResult::AccessDenied => {
                self.fail(OpaliteError::AccessDenied(format!(
                    "commit of transaction {}",
                    self.transaction_id
                )));
                Decision::EndOperation
            }
        }
    }

    fn fail(&mut self, error: OpaliteError) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Err(error));
        }
    }
}
