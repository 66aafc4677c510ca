mod execution;
mod transitions;
