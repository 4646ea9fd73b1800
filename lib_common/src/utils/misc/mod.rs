/// Process and host identification used by the logging setup.
pub mod sys_info;
