mod requeue;
mod scheduler;
