mod cond_chain;
mod fake_lane;
