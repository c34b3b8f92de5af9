//! Try-Confirm-Cancel 事务协调
//!
//! 发起方在事务范围内依次登记参与者并执行其 Try。发起方成功后按登记顺序 Confirm，
//! 失败后按登记逆序 Cancel。Confirm/Cancel 的错误只记录日志，不改变返回给调用方的结果。

pub mod coordinator;
pub mod participant;

pub use coordinator::{
    TccCoordinator, TransactionOutcome, TransactionReport, TransactionScope, TransactionStatus,
};
pub use participant::TccParticipant;
