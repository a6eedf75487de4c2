mod history;
mod tasks;
